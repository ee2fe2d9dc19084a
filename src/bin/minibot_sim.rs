use clap::{App, Arg};
use robofleet::config::DEFAULT_ROBOT_PORT;
use robofleet::minibot::{MinibotSim, MinibotState};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("minibot-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulated minibot speaking the firmware's UDP protocol")
        .arg(
            Arg::with_name("id")
                .short("i")
                .long("id")
                .value_name("ID")
                .help("Robot identity reported in discovery responses")
                .takes_value(true)
                .default_value("minibot-sim"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("UDP port to listen on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log every datagram"),
        )
        .get_matches();

    let level = if matches.is_present("verbose") {
        Level::TRACE
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let id = matches.value_of("id").unwrap_or("minibot-sim");
    let port = match matches.value_of("port") {
        Some(port) => port.parse::<u16>()?,
        None => DEFAULT_ROBOT_PORT,
    };

    let state = MinibotState::new(id)?;
    let socket = UdpSocket::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port))).await?;
    println!("🤖 Minibot {} listening on {}", id, socket.local_addr()?);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sim = tokio::spawn(MinibotSim::new(socket, state).run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    let _ = shutdown_tx.send(true);
    let state = sim.await?;

    info!(
        frames_applied = state.frames_applied,
        frames_ignored = state.frames_ignored,
        "simulator finished"
    );
    println!("🛑 Minibot {} stopped", state.id);
    Ok(())
}
