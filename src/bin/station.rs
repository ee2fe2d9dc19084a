use clap::{App, Arg};
use robofleet::{FleetConfig, Station};
use std::net::{Ipv4Addr, SocketAddr};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("robofleet-station")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Operator station for a fleet of UDP minibots")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON configuration file")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("bind")
                .short("b")
                .long("bind")
                .value_name("ADDR")
                .help("Local address for the robot socket")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("control")
                .long("control")
                .value_name("ADDR")
                .help("Address of the operator control server")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("broadcast")
                .long("broadcast")
                .value_name("IP")
                .help("Subnet broadcast address for discovery and ESTOP")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Raise log verbosity (-v debug, -vv trace)"),
        )
        .get_matches();

    let mut config = match matches.value_of("config") {
        Some(path) => FleetConfig::load(path)?,
        None => FleetConfig::default(),
    };
    if let Some(bind) = matches.value_of("bind") {
        config.bind_addr = bind.parse::<SocketAddr>()?;
    }
    if let Some(control) = matches.value_of("control") {
        config.control_addr = control.parse::<SocketAddr>()?;
    }
    if let Some(broadcast) = matches.value_of("broadcast") {
        config.broadcast_addr = broadcast.parse::<Ipv4Addr>()?;
    }
    config.validate()?;

    let level = match matches.occurrences_of("verbose") {
        0 => config.tracing_level(),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    println!("🤖 Robofleet Station");
    println!("====================");

    let station = match Station::start(config).await {
        Ok(station) => station,
        Err(e) => {
            error!(error = %e, "station failed to start");
            return Err(e.into());
        }
    };
    println!("📡 Robot link on {}", station.udp_addr());
    println!("🎮 Control server on {}", station.control_addr());

    tokio::signal::ctrl_c().await?;
    info!("interrupt received");

    station.shutdown().await;
    println!("🛑 Station stopped");
    Ok(())
}
