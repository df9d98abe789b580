use std::net::IpAddr;

use clap::{Arg, Command};
use m8_driver::M8Client;

fn main() {
    env_logger::init();

    let matches = Command::new("M8 sweep reader")
        .about("Connects to a Quanergy M8 sensor and prints sweep sizes")
        .disable_version_flag(true)
        .arg(
            Arg::new("ip")
                .help("IP address of the sensor")
                .required(true),
        )
        .arg(
            Arg::new("port")
                .help("TCP data port of the sensor")
                .default_value("4141"),
        )
        .get_matches();

    let ip: IpAddr = matches
        .value_of("ip")
        .unwrap()
        .parse()
        .expect("invalid IP address");
    let port: u16 = matches
        .value_of("port")
        .unwrap()
        .parse()
        .expect("invalid port");

    let mut client = M8Client::new(ip, port);
    client.on_sweep(|sweep| {
        println!(
            "Received sweep {} with {} points ({}).",
            sweep.seq,
            sweep.points.len(),
            if sweep.is_dense { "dense" } else { "sparse" }
        );
    });

    if let Err(e) = client.start() {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    std::thread::sleep(std::time::Duration::from_secs(10));
    client.stop();
}
