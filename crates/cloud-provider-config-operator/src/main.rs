use clap::Parser;
use cloud_provider_config_operator::{
    cli::{Command, Opts},
    client::{self, Client},
    controller::run_controller,
    logging::{self, initialize_logging},
    utils::signal::{SignalError, SignalWatcher},
};
use snafu::{ResultExt, Snafu};

const APP_NAME: &str = "cloud-provider-config-operator";
const LOG_ENV: &str = "CLOUD_PROVIDER_CONFIG_OPERATOR_LOG";

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to watch for termination signals"))]
    WatchSignals { source: SignalError },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateClient { source: client::Error },
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let opts = Opts::parse();

    match opts.command {
        Command::Run(args) => {
            initialize_logging(LOG_ENV, APP_NAME, args.log_format)
                .context(InitializeLoggingSnafu)?;

            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                field_manager = %args.field_manager,
                "starting {APP_NAME}"
            );

            let signal_watcher = SignalWatcher::termination().context(WatchSignalsSnafu)?;
            let client = Client::try_default(args.field_manager.clone())
                .await
                .context(CreateClientSnafu)?;

            run_controller(client, args.controller_options(), signal_watcher.handle()).await;
        }
    }

    Ok(())
}
