use robofleet::config::FleetConfig;
use robofleet::control::{ControlRequest, ControlResponse};
use robofleet::input::RawSample;
use robofleet::minibot::{MinibotSim, MinibotState, RobotStatus};
use robofleet::protocol::NEUTRAL_AXIS;
use robofleet::Station;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

const WAIT: Duration = Duration::from_secs(3);

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, port))
}

fn bench_config(robot_port: u16) -> FleetConfig {
    FleetConfig {
        bind_addr: loopback(0),
        control_addr: loopback(0),
        broadcast_addr: Ipv4Addr::LOCALHOST,
        robot_port,
        discovery_period_ms: 20,
        status_period_ms: 20,
        sweep_period_ms: 50,
        ..FleetConfig::default()
    }
}

struct Operator {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
}

impl Operator {
    async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        let (reader, writer) = stream.into_split();
        Self {
            lines: BufReader::new(reader).lines(),
            writer,
        }
    }

    async fn send(&mut self, request: ControlRequest) -> ControlResponse {
        let mut json = serde_json::to_string(&request).unwrap();
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await.unwrap();
        loop {
            let line = timeout(WAIT, self.lines.next_line()).await.unwrap().unwrap().unwrap();
            // Skip streamed events; responses carry `ok`.
            if let Ok(response) = serde_json::from_str::<ControlResponse>(&line) {
                return response;
            }
        }
    }
}

async fn wait_for_discovery(operator: &mut Operator, id: &str) {
    timeout(WAIT, async {
        loop {
            let response = operator.send(ControlRequest::GetRobot { id: id.into() }).await;
            if response.ok {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_station_drives_simulated_robot() {
    let robot_socket = UdpSocket::bind(loopback(0)).await.unwrap();
    let robot_port = robot_socket.local_addr().unwrap().port();
    let (sim_shutdown, sim_signal) = watch::channel(false);
    let sim = tokio::spawn(
        MinibotSim::new(robot_socket, MinibotState::new("minibot-a").unwrap()).run(sim_signal),
    );

    let station = Station::start(bench_config(robot_port)).await.unwrap();
    let mut operator = Operator::connect(station.control_addr()).await;

    wait_for_discovery(&mut operator, "minibot-a").await;
    assert!(operator.send(ControlRequest::Connect { id: "minibot-a".into() }).await.ok);
    assert!(
        operator
            .send(ControlRequest::SetFleetMode { mode: robofleet::FleetMode::Active })
            .await
            .ok
    );

    let sample = RawSample {
        device_name: Some("Xbox Wireless Controller".into()),
        axes: vec![0.0, 1.0, 0.0, 0.0],
        ..RawSample::default()
    };
    assert!(
        operator
            .send(ControlRequest::IngestSample { controller: "pad-0".into(), sample })
            .await
            .ok
    );
    assert!(
        operator
            .send(ControlRequest::Pair { controller: "pad-0".into(), robot: "minibot-a".into() })
            .await
            .ok
    );

    // Let a few poll ticks reach the robot.
    sleep(Duration::from_millis(150)).await;
    let stats = operator.send(ControlRequest::Stats).await.data.unwrap();
    assert!(stats["frames_dispatched"].as_u64().unwrap() > 0);

    drop(operator);
    station.shutdown().await;
    sleep(Duration::from_millis(50)).await;

    let _ = sim_shutdown.send(true);
    let robot = sim.await.unwrap();
    assert!(robot.connected);
    assert_eq!(robot.status, RobotStatus::Teleop);
    assert!(robot.frames_applied > 0);
    // Shutdown ends with a stop frame.
    assert_eq!(robot.axes, [NEUTRAL_AXIS; 4]);
}

#[tokio::test]
async fn test_estop_reaches_robot_through_station() {
    let robot_socket = UdpSocket::bind(loopback(0)).await.unwrap();
    let robot_port = robot_socket.local_addr().unwrap().port();
    let (sim_shutdown, sim_signal) = watch::channel(false);
    let sim = tokio::spawn(
        MinibotSim::new(robot_socket, MinibotState::new("minibot-b").unwrap()).run(sim_signal),
    );

    let station = Station::start(bench_config(robot_port)).await.unwrap();
    let mut operator = Operator::connect(station.control_addr()).await;

    let response = operator.send(ControlRequest::SetOverride { active: true }).await;
    assert!(response.ok);
    sleep(Duration::from_millis(50)).await;

    drop(operator);
    station.shutdown().await;
    let _ = sim_shutdown.send(true);
    let robot = sim.await.unwrap();
    assert!(robot.estopped);
}

#[tokio::test]
async fn test_subscriber_receives_events() {
    let station = Station::start(bench_config(9)).await.unwrap();
    let mut operator = Operator::connect(station.control_addr()).await;

    assert!(operator.send(ControlRequest::Subscribe).await.ok);

    // The event may be written before or after the response line.
    operator
        .writer
        .write_all(b"{\"op\":\"set_override\",\"active\":true}\n")
        .await
        .unwrap();
    let event = timeout(WAIT, async {
        loop {
            let line = operator.lines.next_line().await.unwrap().unwrap();
            let value: serde_json::Value = serde_json::from_str(&line).unwrap();
            if value["type"] == "override_changed" {
                return value;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(event["active"], true);

    drop(operator);
    station.shutdown().await;
}
