mod commandline;

use crate::commandline::{CliConfig, parse_args};
use bytes::Bytes;
use lib_minih3::{AltSvcRegistry, Response, Target, get, post};
use log::{error, info};
use std::process::ExitCode;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = parse_args();
    let config = args.client_config();

    let result = match &args.data {
        Some(body) => post(&args.url, Bytes::from(body.clone().into_bytes()), config).await,
        None => get(&args.url, config).await,
    };

    match result {
        Ok(response) if response.is_timed_out() => {
            println!("Timeout waiting for response.");
            ExitCode::SUCCESS
        }
        Ok(response) => {
            if args.debug {
                report_alt_svc(&args, &response);
            }
            print_response(&response);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("request to {} failed: {}", args.url, e);
            ExitCode::FAILURE
        }
    }
}

fn print_response(response: &Response) {
    println!(":status: {}", response.status());
    for (name, value) in response.headers().iter_lossy() {
        println!("{}: {}", name, value);
    }
    println!();
    println!("{}", String::from_utf8_lossy(response.body()));
}

fn report_alt_svc(args: &CliConfig, response: &Response) {
    let Ok(target) = Target::parse(&args.url, 443) else {
        return;
    };
    let mut registry = AltSvcRegistry::new();
    for endpoint in registry.observe_headers(&target.host, response.headers()) {
        info!(
            "{} advertises {} on {}:{}",
            target.host, endpoint.protocol, endpoint.host, endpoint.port
        );
    }
}
