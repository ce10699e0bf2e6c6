//! Transproxify command line binary
//!
//! Accepts firewall-redirected traffic and forwards it through the
//! configured upstream proxy. The firewall is expected to be set up
//! separately, for example:
//!
//! ```plain
//! iptables -t nat -A PREROUTING -p tcp --match multiport --dports 80,443 \
//!     -j REDIRECT --to-port 10000
//! transproxify proxyserver 8080 10000
//! ```
//!
//! For UDP a TPROXY mangle rule and a local routing table entry are needed
//! instead:
//!
//! ```plain
//! ip rule add fwmark 1 lookup 100
//! ip route add local 0.0.0.0/0 dev lo table 100
//! iptables -t mangle -A PREROUTING -p udp --dport 53 \
//!     -j TPROXY --tproxy-mark 0x1/0x1 --on-port 10000
//! transproxify -r udp -t socks5 proxyserver 1080 10000
//! ```

use std::{process::ExitCode, sync::Arc, time::Duration};

use clap::{Arg, ArgAction, Command};
use log::{error, info};

use transproxify::{
    config::{ProxiedProtocol, ProxyProtocol, ProxySettings},
    run, VERSION,
};

mod logging;
mod monitor;
mod password;

fn parse_proxy_protocol(s: &str) -> Result<ProxyProtocol, String> {
    s.parse::<ProxyProtocol>().map_err(|err| err.to_string())
}

fn parse_proxied_protocol(s: &str) -> Result<ProxiedProtocol, String> {
    s.parse::<ProxiedProtocol>().map_err(|err| err.to_string())
}

fn define_command_line_options(app: Command) -> Command {
    app.arg(
        Arg::new("PROXY_PROTOCOL")
            .short('t')
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(parse_proxy_protocol)
            .default_value("http")
            .help("Upstream proxy protocol (direct, http, socks4, socks5)"),
    )
    .arg(
        Arg::new("PROXIED_PROTOCOL")
            .short('r')
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(parse_proxied_protocol)
            .default_value("tcp")
            .help("Transport protocol to redirect through the proxy (tcp, udp)"),
    )
    .arg(
        Arg::new("USERNAME")
            .short('u')
            .num_args(1)
            .action(ArgAction::Set)
            .help("Username for proxy authentication, sent in cleartext"),
    )
    .arg(
        Arg::new("PASSWORD")
            .short('P')
            .num_args(1)
            .action(ArgAction::Set)
            .help("Password for proxy authentication, sent in cleartext"),
    )
    .arg(
        Arg::new("PROMPT_PASSWORD")
            .short('p')
            .action(ArgAction::SetTrue)
            .help("Prompt for the proxy password at startup with echo disabled"),
    )
    .arg(
        Arg::new("UDP_TIMEOUT")
            .short('T')
            .long("udp-timeout")
            .num_args(1)
            .action(ArgAction::Set)
            .value_parser(clap::value_parser!(u64))
            .help("Seconds before an idle UDP session is evicted (default 60)"),
    )
    .arg(
        Arg::new("VERBOSE")
            .short('v')
            .action(ArgAction::Count)
            .help("Increase log verbosity, repeatable"),
    )
    .arg(
        Arg::new("PROXY_HOST")
            .required(true)
            .help("Host name or address of the upstream proxy"),
    )
    .arg(
        Arg::new("PROXY_PORT")
            .required(true)
            .value_parser(clap::value_parser!(u16))
            .help("TCP port of the upstream proxy, 0 for direct"),
    )
    .arg(
        Arg::new("LISTEN_PORT")
            .required(true)
            .value_parser(clap::value_parser!(u16))
            .help("Local port the firewall redirects traffic to"),
    )
}

fn main() -> ExitCode {
    let mut app = Command::new("transproxify")
        .version(VERSION)
        .about("Transparent TCP/UDP proxying through an HTTP or SOCKS4/5 proxy");
    app = define_command_line_options(app);

    let matches = match app.try_get_matches() {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return ExitCode::FAILURE;
        }
    };

    logging::init(matches.get_count("VERBOSE"));

    let password = if matches.get_flag("PROMPT_PASSWORD") {
        match password::read_proxy_password() {
            Ok(password) => password,
            Err(err) => {
                eprintln!("failed to read password from terminal: {err}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        matches.get_one::<String>("PASSWORD").cloned().unwrap_or_default()
    };

    let username = matches.get_one::<String>("USERNAME").cloned().unwrap_or_default();
    let proxy_host = matches.get_one::<String>("PROXY_HOST").expect("required argument");
    let proxy_port = *matches.get_one::<u16>("PROXY_PORT").expect("required argument");
    let listen_port = *matches.get_one::<u16>("LISTEN_PORT").expect("required argument");

    let settings = match ProxySettings::new(
        *matches.get_one::<ProxyProtocol>("PROXY_PROTOCOL").expect("has default"),
        *matches.get_one::<ProxiedProtocol>("PROXIED_PROTOCOL").expect("has default"),
        proxy_host,
        proxy_port,
        username,
        password,
    ) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };

    let udp_expiry = matches.get_one::<u64>("UDP_TIMEOUT").map(|secs| Duration::from_secs(*secs));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("failed to build tokio runtime: {err}");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        tokio::select! {
            result = run(Arc::new(settings), listen_port, udp_expiry) => {
                match result {
                    Ok(()) => ExitCode::SUCCESS,
                    Err(err) => {
                        error!("server exited with error: {}", err);
                        ExitCode::FAILURE
                    }
                }
            }
            _ = monitor::create_signal_monitor() => {
                info!("shutting down");
                ExitCode::SUCCESS
            }
        }
    })
}
