use std::time::Duration;

use rumqttc::QoS;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use tempdisplay_common::{
    DeviceProfile, Environment, LoopConfig, ModelError, RegisterError, RouteError, TopicBinding,
    TopicRouter,
};

use crate::{
    bridge::InputBridge,
    hardware::{ButtonPort, DisplayError, DisplayPort, IndicatorPort, Rgb, OFF, RED, WHITE},
    session::{BrokerSession, SessionError},
};

/// Indicator layout, carried over from the device front panel: pixel 0
/// tracks session health, pixel 1 tick liveness.
const PIXEL_SESSION: usize = 0;
const PIXEL_LIVENESS: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Degraded,
}

/// A failure inside one Connected tick. Escalates exactly one state, to
/// `Degraded`; it never ends the process by itself.
#[derive(Debug, Error)]
pub enum TickError {
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("broker read failed: {0}")]
    Session(#[from] SessionError),
    #[error("publish failed: {0}")]
    Publish(#[source] SessionError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Display(#[from] DisplayError),
}

/// The one terminal failure: recovery itself failed, so the device resets.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("reconnect failed, device reset required: {0}")]
    ReconnectFailed(#[source] SessionError),
}

/// Owns the broker session lifecycle: connect, verify liveness, run one
/// bounded read/dispatch cycle, bridge button edges to publishes, reconnect
/// on failure, and escalate to a device reset only when reconnection itself
/// fails.
pub struct Supervisor<S, D, I, B> {
    session: S,
    display: D,
    indicator: I,
    buttons: B,
    model: Environment,
    router: TopicRouter,
    bridge: InputBridge,
    run: LoopConfig,
    state: ConnectionState,
    connect_attempts: u32,
}

impl<S, D, I, B> Supervisor<S, D, I, B>
where
    S: BrokerSession,
    D: DisplayPort,
    I: IndicatorPort,
    B: ButtonPort,
{
    pub fn new(
        session: S,
        display: D,
        indicator: I,
        buttons: B,
        profile: &DeviceProfile,
        run: LoopConfig,
    ) -> Result<Self, RegisterError> {
        let model = Environment::new(&profile.channels);
        let mut router = TopicRouter::new();
        for spec in &profile.subscriptions {
            router.register(TopicBinding::from(spec), &model)?;
        }
        let bridge = InputBridge::new(profile.buttons.clone(), profile.step);

        Ok(Self {
            session,
            display,
            indicator,
            buttons,
            model,
            router,
            bridge,
            run,
            state: ConnectionState::Disconnected,
            connect_attempts: 0,
        })
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Runs until the terminal reconnect-failure path; never returns `Ok`.
    pub async fn run(&mut self) -> Result<std::convert::Infallible, SupervisorError> {
        loop {
            self.step().await?;
        }
    }

    /// Advances the state machine by one transition.
    pub async fn step(&mut self) -> Result<(), SupervisorError> {
        match self.state {
            ConnectionState::Disconnected => {
                if self.connect_attempts > 0 {
                    let delay = backoff_delay(self.connect_attempts, &self.run);
                    debug!("retrying connect in {delay:?}");
                    tokio::time::sleep(delay).await;
                }
                self.state = ConnectionState::Connecting;
            }
            ConnectionState::Connecting => match self.establish().await {
                Ok(()) => {
                    info!("connected and subscribed");
                    self.connect_attempts = 0;
                    self.state = ConnectionState::Connected;
                    self.indicate(PIXEL_SESSION, WHITE);
                }
                Err(err) => {
                    warn!("connect failed: {err}");
                    self.connect_attempts = self.connect_attempts.saturating_add(1);
                    self.state = ConnectionState::Disconnected;
                }
            },
            ConnectionState::Connected => {
                if let Err(err) = self.tick().await {
                    warn!("tick failed, session degraded: {err}");
                    self.indicate(PIXEL_SESSION, RED);
                    self.state = ConnectionState::Degraded;
                }
            }
            ConnectionState::Degraded => {
                // Subscriptions survive the reconnect; skip resubscribing.
                match self.session.reconnect(false).await {
                    Ok(()) => {
                        info!("reconnected");
                        self.state = ConnectionState::Connected;
                        self.indicate(PIXEL_SESSION, WHITE);
                    }
                    Err(err) => {
                        error!("reconnect failed, resetting: {err}");
                        self.indicate(PIXEL_SESSION, RED);
                        self.release();
                        return Err(SupervisorError::ReconnectFailed(err));
                    }
                }
            }
        }
        Ok(())
    }

    async fn establish(&mut self) -> Result<(), SessionError> {
        self.session.connect().await?;
        let topics: Vec<String> = self.router.topics().map(str::to_string).collect();
        for topic in topics {
            self.session.subscribe(&topic, QoS::AtMostOnce).await?;
        }
        Ok(())
    }

    /// One steady-state tick: liveness check, bounded read/dispatch, button
    /// bridge. A liveness failure aborts the tick without a state change.
    async fn tick(&mut self) -> Result<(), TickError> {
        self.indicate(PIXEL_LIVENESS, OFF);

        if !self.session.is_connected() {
            warn!("broker liveness check failed, skipping tick");
            return Ok(());
        }
        self.indicate(PIXEL_LIVENESS, WHITE);

        self.read_cycle().await?;
        self.button_cycle().await?;
        Ok(())
    }

    /// Drives the broker read loop until the configured bound elapses,
    /// routing each inbound message through the topic router.
    async fn read_cycle(&mut self) -> Result<(), TickError> {
        let deadline = Instant::now() + Duration::from_millis(self.run.read_bound_ms);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }

            let Some(message) = self.session.poll_bounded(remaining).await? else {
                continue;
            };
            debug!(topic = %message.topic, "message received");

            let changed = self
                .router
                .dispatch(&message.topic, &message.payload, &mut self.model)?;
            if changed.is_empty() {
                debug!(topic = %message.topic, "value unchanged, skipping redraw");
            } else {
                self.redraw(&changed)?;
                self.indicate(PIXEL_SESSION, WHITE);
            }
        }
    }

    async fn button_cycle(&mut self) -> Result<(), TickError> {
        let sample = self.buttons.sample();
        let (changed, outbound) = self.bridge.apply(sample, &mut self.model)?;

        if !changed.is_empty() {
            self.redraw(&changed)?;
        }
        for publish in outbound {
            info!(topic = %publish.topic, payload = %publish.payload, "publishing setpoint");
            self.session
                .publish(&publish.topic, publish.payload, publish.qos)
                .await
                .map_err(TickError::Publish)?;
        }
        Ok(())
    }

    /// Pushes changed channels to the panel, batching so only the last slot
    /// update triggers a physical refresh.
    fn redraw(&mut self, changed: &[String]) -> Result<(), TickError> {
        for (position, key) in changed.iter().enumerate() {
            let (text, slot) = self.model.display_line(key)?;
            let refresh = position + 1 == changed.len();
            self.display.set_text(&text, slot, refresh)?;
        }
        Ok(())
    }

    /// Indicator state is cosmetic, so failures are logged and swallowed.
    fn indicate(&mut self, index: usize, color: Rgb) {
        if let Err(err) = self.indicator.set_pixel(index, color) {
            warn!("indicator update failed: {err}");
        }
    }

    fn release(&mut self) {
        self.display.release();
        self.indicator.release();
    }
}

/// Capped exponential backoff between connect attempts, with a little
/// clock-derived jitter so a fleet of devices does not redial in lockstep.
fn backoff_delay(attempt: u32, run: &LoopConfig) -> Duration {
    let shift = attempt.saturating_sub(1).min(10);
    let base = run
        .backoff_initial_ms
        .saturating_mul(1 << shift)
        .min(run.backoff_max_ms);

    let span = base / 4;
    if span == 0 {
        return Duration::from_millis(base);
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| u64::from(elapsed.subsec_nanos()))
        .unwrap_or(0);
    Duration::from_millis(base - span / 2 + nanos % span)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{ButtonSample, IndicatorError};
    use crate::session::InboundMessage;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use tempdisplay_common::{Button, TOPIC_DESIRED_SETPOINT, TOPIC_TEMPERATURE,
        TOPIC_THERMOSTAT_STATUS};

    #[derive(Default)]
    struct FakeSession {
        connect_results: VecDeque<Result<(), SessionError>>,
        reconnect_results: VecDeque<Result<(), SessionError>>,
        inbound: VecDeque<Result<Option<InboundMessage>, SessionError>>,
        connected: bool,
        polls: usize,
        subscribed: Vec<String>,
        published: Vec<(String, String, QoS)>,
    }

    impl FakeSession {
        fn message(topic: &str, payload: &[u8]) -> Result<Option<InboundMessage>, SessionError> {
            Ok(Some(InboundMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            }))
        }
    }

    impl BrokerSession for FakeSession {
        async fn connect(&mut self) -> Result<(), SessionError> {
            let result = self.connect_results.pop_front().unwrap_or(Ok(()));
            self.connected = result.is_ok();
            result
        }

        async fn subscribe(&mut self, topic: &str, _qos: QoS) -> Result<(), SessionError> {
            self.subscribed.push(topic.to_string());
            Ok(())
        }

        async fn reconnect(&mut self, _resubscribe: bool) -> Result<(), SessionError> {
            let result = self
                .reconnect_results
                .pop_front()
                .unwrap_or(Err(SessionError::AckTimeout));
            self.connected = result.is_ok();
            result
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn poll_bounded(
            &mut self,
            bound: Duration,
        ) -> Result<Option<InboundMessage>, SessionError> {
            self.polls += 1;
            match self.inbound.pop_front() {
                Some(item) => item,
                None => {
                    // Silent broker: let the read bound elapse.
                    tokio::time::sleep(bound).await;
                    Ok(None)
                }
            }
        }

        async fn publish(
            &mut self,
            topic: &str,
            payload: String,
            qos: QoS,
        ) -> Result<(), SessionError> {
            self.published.push((topic.to_string(), payload, qos));
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDisplay {
        texts: Vec<(String, usize, bool)>,
        released: usize,
    }

    impl DisplayPort for RecordingDisplay {
        fn set_text(
            &mut self,
            text: &str,
            slot: usize,
            auto_refresh: bool,
        ) -> Result<(), DisplayError> {
            self.texts.push((text.to_string(), slot, auto_refresh));
            Ok(())
        }

        fn release(&mut self) {
            self.released += 1;
        }
    }

    #[derive(Default)]
    struct RecordingIndicator {
        pixels: Vec<(usize, Rgb)>,
        fail: bool,
        released: usize,
    }

    impl IndicatorPort for RecordingIndicator {
        fn set_pixel(&mut self, index: usize, color: Rgb) -> Result<(), IndicatorError> {
            if self.fail {
                return Err(IndicatorError("dead pixel bus".to_string()));
            }
            self.pixels.push((index, color));
            Ok(())
        }

        fn release(&mut self) {
            self.released += 1;
        }
    }

    #[derive(Default)]
    struct ScriptedButtons {
        samples: VecDeque<ButtonSample>,
    }

    impl ButtonPort for ScriptedButtons {
        fn sample(&mut self) -> ButtonSample {
            self.samples.pop_front().unwrap_or_default()
        }
    }

    fn test_run_config() -> LoopConfig {
        LoopConfig {
            read_bound_ms: 50,
            ..LoopConfig::default()
        }
    }

    fn supervisor(
        session: FakeSession,
        buttons: ScriptedButtons,
    ) -> Supervisor<FakeSession, RecordingDisplay, RecordingIndicator, ScriptedButtons> {
        Supervisor::new(
            session,
            RecordingDisplay::default(),
            RecordingIndicator::default(),
            buttons,
            &DeviceProfile::default(),
            test_run_config(),
        )
        .unwrap()
    }

    async fn connect(
        supervisor: &mut Supervisor<
            FakeSession,
            RecordingDisplay,
            RecordingIndicator,
            ScriptedButtons,
        >,
    ) {
        supervisor.step().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Connecting);
        supervisor.step().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_subscribes_every_bound_topic() {
        let mut supervisor = supervisor(FakeSession::default(), ScriptedButtons::default());

        connect(&mut supervisor).await;

        assert_eq!(
            supervisor.session.subscribed,
            vec![
                TOPIC_TEMPERATURE.to_string(),
                TOPIC_THERMOSTAT_STATUS.to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_deliveries_redraw_only_on_change() {
        let mut session = FakeSession::default();
        session.inbound = VecDeque::from(vec![
            FakeSession::message(TOPIC_TEMPERATURE, b"70.0"),
            FakeSession::message(TOPIC_TEMPERATURE, b"70.0"),
            FakeSession::message(TOPIC_TEMPERATURE, b"71.0"),
        ]);
        let mut supervisor = supervisor(session, ScriptedButtons::default());

        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(
            supervisor.display.texts,
            vec![
                ("70°F".to_string(), 0, true),
                ("71°F".to_string(), 0, true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn structured_payload_updates_both_slots_in_one_refresh() {
        let mut session = FakeSession::default();
        session.inbound = VecDeque::from(vec![FakeSession::message(
            TOPIC_THERMOSTAT_STATUS,
            br#"{"current": 71.5, "desired": 72.0}"#,
        )]);
        let mut supervisor = supervisor(session, ScriptedButtons::default());

        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();

        // Batched: only the last slot update triggers a physical refresh.
        assert_eq!(
            supervisor.display.texts,
            vec![
                ("71.5°F".to_string(), 0, false),
                ("72°F".to_string(), 1, true),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_failure_aborts_tick_without_transition() {
        let mut supervisor = supervisor(FakeSession::default(), ScriptedButtons::default());
        connect(&mut supervisor).await;

        supervisor.session.connected = false;
        supervisor.step().await.unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Connected);
        assert_eq!(supervisor.session.polls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_error_degrades_then_reconnect_recovers() {
        let mut session = FakeSession::default();
        session.inbound = VecDeque::from(vec![Err(SessionError::AckTimeout)]);
        session.reconnect_results = VecDeque::from(vec![Ok(())]);
        let mut supervisor = supervisor(session, ScriptedButtons::default());

        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Degraded);

        supervisor.step().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn broker_disconnect_degrades_then_reconnect_recovers() {
        let mut session = FakeSession::default();
        session.inbound = VecDeque::from(vec![
            FakeSession::message(TOPIC_TEMPERATURE, b"70.0"),
            Err(SessionError::Disconnected),
        ]);
        session.reconnect_results = VecDeque::from(vec![Ok(())]);
        let mut supervisor = supervisor(session, ScriptedButtons::default());

        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Degraded);

        supervisor.step().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Connected);
        // The reading delivered before the disconnect stays on the panel.
        assert_eq!(
            supervisor.display.texts,
            vec![("70°F".to_string(), 0, true)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_payload_degrades_session() {
        let mut session = FakeSession::default();
        session.inbound = VecDeque::from(vec![FakeSession::message(TOPIC_TEMPERATURE, b"warm")]);
        let mut supervisor = supervisor(session, ScriptedButtons::default());

        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Degraded);
        // The last rendered value is never corrupted by a bad payload.
        assert!(supervisor.display.texts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_failure_is_terminal_and_cleans_up_once() {
        let mut session = FakeSession::default();
        session.inbound = VecDeque::from(vec![Err(SessionError::AckTimeout)]);
        session.reconnect_results = VecDeque::from(vec![Err(SessionError::AckTimeout)]);
        let mut supervisor = supervisor(session, ScriptedButtons::default());

        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();
        assert_eq!(supervisor.state(), ConnectionState::Degraded);

        let err = supervisor.step().await.unwrap_err();
        assert!(matches!(err, SupervisorError::ReconnectFailed(_)));
        assert_eq!(supervisor.display.released, 1);
        assert_eq!(supervisor.indicator.released, 1);
        assert_eq!(supervisor.indicator.pixels.last(), Some(&(PIXEL_SESSION, RED)));
    }

    #[tokio::test(start_paused = true)]
    async fn button_increase_publishes_new_setpoint() {
        let mut session = FakeSession::default();
        session.inbound = VecDeque::from(vec![FakeSession::message(
            TOPIC_THERMOSTAT_STATUS,
            br#"{"current": 71.5, "desired": 72.0}"#,
        )]);
        let mut buttons = ScriptedButtons::default();
        let mut pressed = ButtonSample::default();
        pressed.pressed[Button::A as usize] = true;
        buttons.samples = VecDeque::from(vec![pressed]);

        let mut supervisor = supervisor(session, buttons);
        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();

        assert_eq!(
            supervisor.session.published,
            vec![(
                TOPIC_DESIRED_SETPOINT.to_string(),
                "72.2".to_string(),
                QoS::AtMostOnce
            )]
        );
        // The nudged setpoint is also redrawn.
        assert_eq!(
            supervisor.display.texts.last(),
            Some(&("72.2°F".to_string(), 1, true))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn indicator_failures_are_swallowed() {
        let mut supervisor = supervisor(FakeSession::default(), ScriptedButtons::default());
        supervisor.indicator.fail = true;

        connect(&mut supervisor).await;
        supervisor.step().await.unwrap();

        assert_eq!(supervisor.state(), ConnectionState::Connected);
    }

    #[test]
    fn backoff_grows_and_caps() {
        let run = LoopConfig::default();

        let first = backoff_delay(1, &run);
        let fourth = backoff_delay(4, &run);
        let huge = backoff_delay(40, &run);

        assert!(first >= Duration::from_millis(run.backoff_initial_ms / 2));
        assert!(fourth > first);
        assert!(huge <= Duration::from_millis(run.backoff_max_ms + run.backoff_max_ms / 4));
    }
}
