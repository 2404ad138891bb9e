//! Hoist - install k3s over SSH and fetch its kubeconfig

use clap::Parser;

use hoist_cli::app::init_tracing;
use hoist_cli::cli::Cli;
use hoist_cli::domain::ProvisionError;
use hoist_cli::output::OutputContext;
use hoist_cli::output::json::format_error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let (json, no_color) = (cli.json, cli.no_color);

    if let Err(e) = cli.run().await {
        if json {
            let code = e
                .chain()
                .find_map(|cause| cause.downcast_ref::<ProvisionError>())
                .map_or("ERROR", ProvisionError::code);
            match format_error(&format!("{e:#}"), code) {
                Ok(out) => println!("{out}"),
                Err(_) => eprintln!("Error: {e:#}"),
            }
        } else {
            OutputContext::new(no_color, false).error(&format!("{e:#}"));
        }
        std::process::exit(1);
    }
}
