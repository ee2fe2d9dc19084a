use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use robofleet::control::{ControlRequest, ControlResponse};
use robofleet::protocol::FleetMode;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult<()> {
    let robot_arg = || Arg::with_name("robot").help("Robot identity").required(true);
    let controller_arg = || Arg::with_name("controller").help("Controller identity").required(true);

    let matches = App::new("robofleet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Operator console for the robofleet station")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Station control host")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Station control port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("robots").about("List connected and discovered robots"))
        .subcommand(SubCommand::with_name("refresh").about("Probe the network for robots now"))
        .subcommand(SubCommand::with_name("connect").about("Connect a discovered robot").arg(robot_arg()))
        .subcommand(SubCommand::with_name("disconnect").about("Stop and forget a robot").arg(robot_arg()))
        .subcommand(SubCommand::with_name("enable").about("Allow movement to a robot").arg(robot_arg()))
        .subcommand(SubCommand::with_name("disable").about("Stop a robot and refuse movement").arg(robot_arg()))
        .subcommand(SubCommand::with_name("stop").about("Send a stop frame to a robot").arg(robot_arg()))
        .subcommand(SubCommand::with_name("controllers").about("List operator controllers"))
        .subcommand(
            SubCommand::with_name("pair")
                .about("Drive a robot with a controller")
                .arg(controller_arg())
                .arg(robot_arg()),
        )
        .subcommand(SubCommand::with_name("unpair").about("Release a controller's robot").arg(controller_arg()))
        .subcommand(
            SubCommand::with_name("estop")
                .about("Emergency override for the whole fleet")
                .arg(
                    Arg::with_name("state")
                        .help("Override state")
                        .required(true)
                        .possible_values(&["on", "off"]),
                ),
        )
        .subcommand(
            SubCommand::with_name("mode")
                .about("Get or set the fleet mode")
                .arg(
                    Arg::with_name("mode")
                        .help("New fleet mode")
                        .possible_values(&["standby", "active"]),
                ),
        )
        .subcommand(SubCommand::with_name("stats").about("Station counters"))
        .subcommand(SubCommand::with_name("monitor").about("Stream fleet events (Ctrl+C to stop)"))
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let station = Station { host, port };

    match matches.subcommand() {
        ("robots", _) => {
            let response = station.request(&ControlRequest::ListRobots).await?;
            print_robots(&response, format);
        }
        ("refresh", _) => {
            let response = station.request(&ControlRequest::RefreshRobots).await?;
            print_result("Refresh", "robots", &response, format);
        }
        ("connect", Some(sub)) => {
            let id = required(sub, "robot")?;
            let response = station.request(&ControlRequest::Connect { id: id.clone() }).await?;
            print_result("Connect", &id, &response, format);
        }
        ("disconnect", Some(sub)) => {
            let id = required(sub, "robot")?;
            let response = station.request(&ControlRequest::Disconnect { id: id.clone() }).await?;
            print_result("Disconnect", &id, &response, format);
        }
        ("enable", Some(sub)) => {
            let id = required(sub, "robot")?;
            let response = station.request(&ControlRequest::EnableRobot { id: id.clone() }).await?;
            print_result("Enable", &id, &response, format);
        }
        ("disable", Some(sub)) => {
            let id = required(sub, "robot")?;
            let response = station.request(&ControlRequest::DisableRobot { id: id.clone() }).await?;
            print_result("Disable", &id, &response, format);
        }
        ("stop", Some(sub)) => {
            let id = required(sub, "robot")?;
            let response = station.request(&ControlRequest::SendStop { id: id.clone() }).await?;
            print_result("Stop", &id, &response, format);
        }
        ("controllers", _) => {
            let response = station.request(&ControlRequest::ListControllers).await?;
            print_controllers(&response, format);
        }
        ("pair", Some(sub)) => {
            let controller = required(sub, "controller")?;
            let robot = required(sub, "robot")?;
            let target = format!("{controller} -> {robot}");
            let response = station.request(&ControlRequest::Pair { controller, robot }).await?;
            print_result("Pair", &target, &response, format);
        }
        ("unpair", Some(sub)) => {
            let controller = required(sub, "controller")?;
            let response = station
                .request(&ControlRequest::Unpair {
                    controller: controller.clone(),
                })
                .await?;
            print_result("Unpair", &controller, &response, format);
        }
        ("estop", Some(sub)) => {
            let active = sub.value_of("state") == Some("on");
            let response = station.request(&ControlRequest::SetOverride { active }).await?;
            let label = if active { "ENGAGED" } else { "RELEASED" };
            print_result("Emergency override", label, &response, format);
        }
        ("mode", Some(sub)) => match sub.value_of("mode") {
            Some(mode) => {
                let mode = if mode == "active" {
                    FleetMode::Active
                } else {
                    FleetMode::Standby
                };
                let response = station.request(&ControlRequest::SetFleetMode { mode }).await?;
                print_result("Fleet mode", mode.wire_name(), &response, format);
            }
            None => {
                let response = station.request(&ControlRequest::GetFleetMode).await?;
                print_mode(&response, format);
            }
        },
        ("stats", _) => {
            let response = station.request(&ControlRequest::Stats).await?;
            print_stats(&response, format);
        }
        ("monitor", _) => station.monitor(format).await?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
        }
    }

    Ok(())
}

fn required(matches: &ArgMatches<'_>, name: &str) -> CliResult<String> {
    matches
        .value_of(name)
        .map(str::to_string)
        .ok_or_else(|| format!("missing argument: {name}").into())
}

struct Station<'a> {
    host: &'a str,
    port: u16,
}

impl Station<'_> {
    async fn open(&self) -> CliResult<TcpStream> {
        let addr = format!("{}:{}", self.host, self.port);
        match TcpStream::connect(&addr).await {
            Ok(stream) => Ok(stream),
            Err(e) => {
                eprintln!("{} Failed to reach station at {}", "❌".red(), addr.bright_white());
                if e.kind() == std::io::ErrorKind::ConnectionRefused {
                    eprintln!("{} Station is not running. Start it with:", "💡".yellow());
                    eprintln!("   {}", "robofleet-station".bright_cyan());
                }
                Err(e.into())
            }
        }
    }

    async fn request(&self, request: &ControlRequest) -> CliResult<ControlResponse> {
        let stream = self.open().await?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let mut json = serde_json::to_string(request)?;
        json.push('\n');

        let exchange = async {
            writer.write_all(json.as_bytes()).await?;
            lines.next_line().await
        };
        match tokio::time::timeout(REQUEST_TIMEOUT, exchange).await {
            Ok(Ok(Some(line))) => Ok(serde_json::from_str(&line)?),
            Ok(Ok(None)) => Err("station closed the connection".into()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                eprintln!("{} Request timed out after 5 seconds", "⏰".yellow());
                Err("request timeout".into())
            }
        }
    }

    async fn monitor(&self, format: &str) -> CliResult<()> {
        let stream = self.open().await?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        let mut json = serde_json::to_string(&ControlRequest::Subscribe)?;
        json.push('\n');
        writer.write_all(json.as_bytes()).await?;

        println!("{}", "📡 Monitoring fleet events (Press Ctrl+C to stop)...".bright_blue().bold());
        while let Some(line) = lines.next_line().await? {
            let Ok(value) = serde_json::from_str::<Value>(&line) else {
                continue;
            };
            // The subscribe acknowledgement has no event type.
            if value.get("type").is_none() {
                continue;
            }
            match format {
                "json" => println!("{line}"),
                _ => print_event(&value),
            }
        }
        Ok(())
    }
}

fn print_result(action: &str, target: &str, response: &ControlResponse, format: &str) {
    match format {
        "json" => print_json(response),
        "compact" => {
            if response.ok {
                println!("{}", "OK".bright_green());
            } else {
                println!("{}", "FAIL".bright_red());
            }
        }
        _ => {
            if response.ok {
                println!("{} {} {}", "✅".green(), action.bright_white(), target.bright_cyan());
            } else {
                let message = response.message.as_deref().unwrap_or("request rejected");
                println!("{} {} failed: {}", "❌".red(), action.bright_white(), message.bright_red());
                if message.contains("override") {
                    println!("{} Try: {}", "💡".yellow(), "robofleet estop off".bright_cyan());
                } else if message.contains("not found") {
                    println!("{} Try: {}", "💡".yellow(), "robofleet robots".bright_cyan());
                }
            }
        }
    }
}

fn print_json(response: &ControlResponse) {
    match serde_json::to_string_pretty(response) {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("{} {}", "❌".red(), e),
    }
}

fn data_or_report(response: &ControlResponse) -> Option<&Value> {
    if !response.ok {
        let message = response.message.as_deref().unwrap_or("request rejected");
        println!("{} {}", "❌".red(), message.bright_red());
        return None;
    }
    response.data.as_ref()
}

fn print_robots(response: &ControlResponse, format: &str) {
    if format == "json" {
        return print_json(response);
    }
    let Some(data) = data_or_report(response) else {
        return;
    };

    for (title, key) in [("Connected", "connected"), ("Discovered", "discovered")] {
        let robots = data[key].as_array().cloned().unwrap_or_default();
        println!("\n{} ({})", title.bright_blue().bold(), robots.len());
        if robots.is_empty() {
            println!("  {}", "none".dimmed());
            continue;
        }
        for robot in robots {
            let id = robot["id"].as_str().unwrap_or("?");
            let address = robot["address"].as_str().unwrap_or("?");
            if format == "compact" {
                println!("{id} {address}");
                continue;
            }
            let enabled = if robot["enabled"].as_bool().unwrap_or(false) {
                "enabled".green()
            } else {
                "disabled".red()
            };
            let receiving = if robot["receiving"].as_bool().unwrap_or(false) {
                "moving".bright_yellow()
            } else {
                "idle".dimmed()
            };
            let paired = robot["paired_controller"].as_str().unwrap_or("-");
            println!(
                "  {:<20} {:<16} {:<9} {:<7} pad: {}",
                id.bright_white(),
                address,
                enabled,
                receiving,
                paired.bright_cyan()
            );
        }
    }
}

fn print_controllers(response: &ControlResponse, format: &str) {
    if format == "json" {
        return print_json(response);
    }
    let Some(data) = data_or_report(response) else {
        return;
    };
    let controllers = data.as_array().cloned().unwrap_or_default();
    println!("\n{} ({})", "Controllers".bright_blue().bold(), controllers.len());
    for controller in controllers {
        let id = controller["id"].as_str().unwrap_or("?");
        let name = controller["display_name"].as_str().unwrap_or("?");
        let robot = controller["paired_robot"].as_str().unwrap_or("-");
        if format == "compact" {
            println!("{id} {robot}");
            continue;
        }
        let active = if controller["active"].as_bool().unwrap_or(false) {
            "●".bright_green()
        } else {
            "○".dimmed()
        };
        let enabled = if controller["enabled"].as_bool().unwrap_or(false) {
            "enabled".green()
        } else {
            "disabled".red()
        };
        println!(
            "  {} {:<16} {:<14} {:<9} robot: {}",
            active,
            id.bright_white(),
            name,
            enabled,
            robot.bright_cyan()
        );
    }
}

fn print_mode(response: &ControlResponse, format: &str) {
    if format == "json" {
        return print_json(response);
    }
    if let Some(mode) = data_or_report(response).and_then(Value::as_str) {
        let mode = if mode == "active" {
            mode.bright_green().bold()
        } else {
            mode.yellow().bold()
        };
        println!("{} {}", "Fleet mode:".bright_white(), mode);
    }
}

fn print_stats(response: &ControlResponse, format: &str) {
    if format == "json" {
        return print_json(response);
    }
    let Some(stats) = data_or_report(response) else {
        return;
    };
    let override_active = stats["override_active"].as_bool().unwrap_or(false);
    println!("\n{}", "📊 Station Statistics".bright_blue().bold());
    println!("{}", "═════════════════════".bright_blue());
    println!("Uptime:            {} s", stats["uptime_ms"].as_u64().unwrap_or(0) / 1000);
    println!("Fleet mode:        {}", stats["fleet_mode"].as_str().unwrap_or("?"));
    println!(
        "Override:          {}",
        if override_active { "ENGAGED".bright_red().bold() } else { "clear".green() }
    );
    println!(
        "Robots:            {} connected, {} discovered",
        stats["connected_robots"], stats["discovered_robots"]
    );
    println!("Controllers:       {}", stats["controllers"]);
    println!(
        "Datagrams in:      {} ({} malformed)",
        stats["datagrams_received"], stats["malformed_datagrams"]
    );
    println!(
        "Frames out:        {} ({} dispatch failures)",
        stats["link"]["frames_sent"], stats["dispatch_failures"]
    );
    println!("Send failures:     {}", stats["link"]["send_failures"]);
    println!("Evictions:         {}", stats["evictions"]);
}

fn print_event(event: &Value) {
    let kind = event["type"].as_str().unwrap_or("unknown");
    match kind {
        "robot_discovered" | "robot_connected" | "robot_updated" => {
            let id = event["robot"]["id"].as_str().unwrap_or("?");
            let address = event["robot"]["address"].as_str().unwrap_or("?");
            println!("{} {} {}", kind.bright_green(), id.bright_white(), address.dimmed());
        }
        "robot_disconnected" => {
            let id = event["id"].as_str().unwrap_or("?");
            let reason = event["reason"].as_str().unwrap_or("?");
            println!("{} {} ({})", kind.bright_red(), id.bright_white(), reason);
        }
        "override_changed" => {
            if event["active"].as_bool().unwrap_or(false) {
                println!("{}", "EMERGENCY OVERRIDE ENGAGED".on_red().white().bold());
            } else {
                println!("{}", "emergency override released".bright_green());
            }
        }
        "robots_refreshing" => println!("{} scanning for robots", kind.bright_blue()),
        "controller_set_changed" => {
            let count = event["controllers"].as_array().map_or(0, Vec::len);
            println!("{} {} controller(s)", kind.bright_cyan(), count);
        }
        _ => println!("{} {}", kind.bright_blue(), event),
    }
}
