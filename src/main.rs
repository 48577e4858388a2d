// SPDX-License-Identifier: GPL-3.0-or-later
use anyhow::Context as _;
use structopt::StructOpt;
use tracing::{error, info};

mod acquisition;
mod buffer;
mod frame;
mod image_buffer;
mod pipeline;
mod render;
mod settings;
mod source;
mod stream;
mod util;

use crate::pipeline::Pipeline;
use crate::settings::{Args, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::from_args();
    let mut config = Settings::from_path(&args.config_path)?;
    config.apply_args(&args);
    let dispatch = config.logging.dispatch()?;
    tracing::dispatcher::set_global_default(dispatch.clone())
        .context("unable to install the global log subscriber")?;
    info!(config_path = %args.config_path.display(), "starting thermocast");
    let mut pipeline = Pipeline::new(config, dispatch)?;
    info!(address = %pipeline.local_address(), "serving frames");
    let result = tokio::select! {
        res = &mut pipeline => {
            if let Err(err) = &res {
                error!(error = ?err, "pipeline task failed");
            }
            res
        }
        signal = tokio::signal::ctrl_c() => {
            info!("interrupted, shutting down");
            signal.context("unable to listen for ctrl-c")
        }
    };
    pipeline.shutdown().await?;
    result
}
