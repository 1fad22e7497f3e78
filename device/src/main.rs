mod bridge;
mod hardware;
mod session;
mod supervisor;

use std::convert::Infallible;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};

use tempdisplay_common::{DeviceConfig, Environment, TopicBinding, TopicRouter};

use crate::{
    hardware::{LogDisplay, LogIndicator, NoButtons},
    session::MqttSession,
    supervisor::{Supervisor, SupervisorError},
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = DeviceConfig::load().context("device configuration is incomplete")?;
    validate_profile(&config).context("invalid device profile")?;
    info!(
        ssid = %config.broker.wifi_ssid,
        broker = %config.broker.host,
        port = config.broker.port,
        "starting; wifi association is handled by the platform"
    );

    let cooldown = Duration::from_millis(config.run.restart_cooldown_ms);

    // Last-resort safety net around the supervisor: anything unanticipated
    // (including a panic) restarts the whole session from scratch after a
    // cooldown. The reconnect-failure path is the one deliberate exit.
    loop {
        match tokio::spawn(run_supervisor(config.clone())).await {
            Ok(Ok(never)) => match never {},
            Ok(Err(err)) => {
                if err.downcast_ref::<SupervisorError>().is_some() {
                    error!("supervisor requested device reset: {err:#}");
                    return Err(err);
                }
                error!("supervisor failed: {err:#}; restarting in {cooldown:?}");
            }
            Err(join_err) => {
                error!("supervisor aborted: {join_err}; restarting in {cooldown:?}");
            }
        }
        tokio::time::sleep(cooldown).await;
    }
}

async fn run_supervisor(config: DeviceConfig) -> anyhow::Result<Infallible> {
    let session = MqttSession::new(
        &config.broker,
        Duration::from_millis(config.run.connect_timeout_ms),
        Duration::from_millis(config.run.reconnect_timeout_ms),
    );
    let mut supervisor = Supervisor::new(
        session,
        LogDisplay,
        LogIndicator,
        NoButtons,
        &config.profile,
        config.run.clone(),
    )
    .context("topic registration failed")?;

    let never = supervisor.run().await?;
    match never {}
}

/// Registration problems are startup-fatal, so surface them before the
/// restart loop can mask them as transient.
fn validate_profile(config: &DeviceConfig) -> anyhow::Result<()> {
    let model = Environment::new(&config.profile.channels);
    let mut router = TopicRouter::new();
    for spec in &config.profile.subscriptions {
        router.register(TopicBinding::from(spec), &model)?;
    }
    for binding in &config.profile.buttons {
        if !model.contains(&binding.key) {
            anyhow::bail!("button bound to unknown channel {:?}", binding.key);
        }
    }
    Ok(())
}
