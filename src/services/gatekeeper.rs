use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::Config;
use crate::error::GateError;
use crate::models::action::{ActionOutcome, CooldownState, OverridePrompt, PowerAction};
use crate::models::user::Claims;
use crate::services::aggregator::StatusAggregator;
use crate::services::power::PowerControl;
use crate::utils::has_any_role;

pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct GatePolicy {
    pub cooldown: Duration,
    pub confirm_timeout: Duration,
    pub power_roles: Vec<String>,
    pub sudo_roles: Vec<String>,
}

impl From<&Config> for GatePolicy {
    fn from(config: &Config) -> Self {
        Self {
            cooldown: config.cooldown,
            confirm_timeout: CONFIRM_TIMEOUT,
            power_roles: config.power_roles.clone(),
            sudo_roles: config.sudo_roles.clone(),
        }
    }
}

struct PendingOverride {
    guild: String,
    requester: String,
    action: PowerAction,
    ack: oneshot::Sender<Acknowledgement>,
}

struct Acknowledgement {
    reply: oneshot::Sender<Result<ActionOutcome, GateError>>,
}

/// When the action group last fired in one guild.
type Bucket = Arc<Mutex<Option<Instant>>>;

/// Decides whether a power action may run.
///
/// Boot, shutdown and reboot share one cooldown per guild: firing any of them blocks
/// all three until it expires. A guild's bucket stays locked from the cooldown check
/// until the cooldown is armed, so concurrent commands in that guild are serialized
/// and a cooldown is only armed after the endpoint accepted the action. Other guilds
/// only contend on the bucket table for the lookup.
pub struct Gatekeeper {
    aggregator: Arc<StatusAggregator>,
    power: Arc<dyn PowerControl>,
    policy: GatePolicy,
    buckets: Mutex<HashMap<String, Bucket>>,
    pending: Mutex<HashMap<Uuid, PendingOverride>>,
}

impl Gatekeeper {
    pub fn new(aggregator: Arc<StatusAggregator>, power: Arc<dyn PowerControl>, policy: GatePolicy) -> Self {
        Self {
            aggregator,
            power,
            policy,
            buckets: Mutex::new(HashMap::new()),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_elevated(&self, caller: &Claims) -> bool {
        has_any_role(&self.policy.sudo_roles, &caller.roles)
    }

    pub async fn host_status(&self) -> bool {
        self.power.is_alive().await
    }

    pub async fn cooldown_state(&self, guild: &str) -> CooldownState {
        let bucket = self.buckets.lock().await.get(guild).cloned();
        let remaining = match bucket {
            Some(bucket) => self.remaining(*bucket.lock().await),
            None => None,
        };
        match remaining {
            Some(remaining) => CooldownState::Cooldown {
                remaining_secs: ceil_secs(remaining),
            },
            None => CooldownState::Ready,
        }
    }

    /// Entry point for `/boot`, `/shutdown` and `/reboot`.
    pub async fn request(self: &Arc<Self>, caller: &Claims, action: PowerAction) -> Result<ActionOutcome, GateError> {
        if !has_any_role(&self.policy.power_roles, &caller.roles) {
            return Err(GateError::Forbidden(action.to_string()));
        }

        let bucket = self.bucket(&caller.guild).await;
        let mut last_fired = bucket.lock().await;
        if let Some(remaining) = self.remaining(*last_fired) {
            if self.is_elevated(caller) {
                drop(last_fired);
                tracing::info!("`/{}` on cooldown, redirecting {} to override", action, caller.sub);
                return self.request_override(caller, action).await;
            }
            tracing::info!("`/{}` refused for {}: {}s of cooldown left", action, caller.sub, ceil_secs(remaining));
            return Ok(ActionOutcome::OnCooldown {
                action,
                remaining_secs: ceil_secs(remaining),
            });
        }

        self.execute(&mut last_fired, &caller.guild, action, true).await
    }

    /// Entry point for `/override <action>`. Posts a prompt that the same user has to
    /// confirm within the confirmation timeout; nothing changes until then.
    pub async fn request_override(
        self: &Arc<Self>,
        caller: &Claims,
        action: PowerAction,
    ) -> Result<ActionOutcome, GateError> {
        if !self.is_elevated(caller) {
            return Err(GateError::Forbidden(format!("override {}", action)));
        }

        let id = Uuid::new_v4();
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            if pending.values().any(|p| p.guild == caller.guild) {
                return Err(GateError::OverridePending);
            }
            pending.insert(
                id,
                PendingOverride {
                    guild: caller.guild.clone(),
                    requester: caller.sub.clone(),
                    action,
                    ack: ack_tx,
                },
            );
        }

        let expires_in = chrono::Duration::from_std(self.policy.confirm_timeout).unwrap_or_else(|_| chrono::Duration::seconds(5));
        let prompt = OverridePrompt {
            id,
            action,
            guild: caller.guild.clone(),
            requester: caller.sub.clone(),
            expires_at: Utc::now() + expires_in,
        };
        tracing::info!("Override of `/{}` requested by {} (prompt {})", action, caller.sub, id);

        let gate = Arc::clone(self);
        let guild = caller.guild.clone();
        tokio::spawn(async move {
            gate.await_confirmation(id, guild, action, ack_rx).await;
        });

        Ok(ActionOutcome::AwaitingConfirmation(prompt))
    }

    /// Acknowledges a pending override. Resets the guild's cooldown and runs the action
    /// without the player check. Returns the action's outcome.
    pub async fn confirm_override(&self, id: Uuid, caller: &Claims) -> Result<ActionOutcome, GateError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().await;
            let owner = pending.get(&id).ok_or(GateError::OverrideExpired)?;
            if owner.requester != caller.sub || owner.guild != caller.guild {
                return Err(GateError::NotRequester);
            }
            let entry = pending.remove(&id).ok_or(GateError::OverrideExpired)?;
            tracing::info!("Override of `/{}` confirmed by {}", entry.action, caller.sub);
            entry
                .ack
                .send(Acknowledgement { reply: reply_tx })
                .map_err(|_| GateError::OverrideExpired)?;
        }

        reply_rx
            .await
            .map_err(|_| GateError::Internal("override task ended without a result".to_string()))?
    }

    async fn await_confirmation(
        &self,
        id: Uuid,
        guild: String,
        action: PowerAction,
        ack_rx: oneshot::Receiver<Acknowledgement>,
    ) {
        match tokio::time::timeout(self.policy.confirm_timeout, ack_rx).await {
            Ok(Ok(ack)) => {
                let result = self.execute_override(&guild, action).await;
                let _ = ack.reply.send(result);
            }
            Ok(Err(_)) => {
                self.pending.lock().await.remove(&id);
            }
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::info!("Override of `/{}` in guild {} was not confirmed in time", action, guild);
            }
        }
    }

    async fn execute_override(&self, guild: &str, action: PowerAction) -> Result<ActionOutcome, GateError> {
        let bucket = self.bucket(guild).await;
        let mut last_fired = bucket.lock().await;
        *last_fired = None;
        tracing::info!("Cooldowns reset for guild {}", guild);

        self.execute(&mut last_fired, guild, action, false).await
    }

    async fn execute(
        &self,
        last_fired: &mut Option<Instant>,
        guild: &str,
        action: PowerAction,
        check_players: bool,
    ) -> Result<ActionOutcome, GateError> {
        let mut unconfirmed_servers = Vec::new();
        if check_players && action.requires_idle_check() {
            let verdict = self.aggregator.is_anyone_active().await;
            if verdict.anyone_active {
                tracing::warn!("`/{}` refused: {} players online", action, verdict.players);
                return Ok(ActionOutcome::PlayersOnline {
                    action,
                    failed_servers: verdict.failed_servers,
                });
            }
            if !verdict.failed_servers.is_empty() {
                tracing::warn!(
                    "Proceeding with `/{}` although these servers could not be checked: {:?}",
                    action,
                    verdict.failed_servers
                );
            }
            unconfirmed_servers = verdict.failed_servers;
        }

        if let Err(source) = self.power.dispatch(action).await {
            tracing::error!("`/{}` failed at the power endpoint: {}", action, source);
            return Err(GateError::ActionFailed { action, source });
        }

        *last_fired = Some(Instant::now());
        tracing::info!(
            "`/{}` dispatched, cooldown armed for guild {} ({}s)",
            action,
            guild,
            self.policy.cooldown.as_secs()
        );

        Ok(ActionOutcome::Executed {
            action,
            unconfirmed_servers,
        })
    }

    async fn bucket(&self, guild: &str) -> Bucket {
        let mut buckets = self.buckets.lock().await;
        buckets.entry(guild.to_string()).or_default().clone()
    }

    fn remaining(&self, last_fired: Option<Instant>) -> Option<Duration> {
        let elapsed = last_fired?.elapsed();
        (elapsed < self.policy.cooldown).then(|| self.policy.cooldown - elapsed)
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ActionError;
    use crate::services::aggregator::tests::FakeQuery;
    use crate::services::registry::Registry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    pub(crate) struct FakePower {
        pub calls: std::sync::Mutex<Vec<PowerAction>>,
        pub fail: AtomicBool,
        /// Makes every call take two seconds.
        pub slow: AtomicBool,
    }

    impl FakePower {
        pub(crate) fn calls(&self) -> Vec<PowerAction> {
            self.calls.lock().unwrap().clone()
        }

        async fn record(&self, action: PowerAction) -> Result<(), ActionError> {
            if self.slow.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(ActionError::Unreachable("connection refused".to_string()));
            }
            self.calls.lock().unwrap().push(action);
            Ok(())
        }
    }

    #[async_trait]
    impl PowerControl for FakePower {
        async fn boot(&self) -> Result<(), ActionError> {
            self.record(PowerAction::Boot).await
        }

        async fn shutdown(&self) -> Result<(), ActionError> {
            self.record(PowerAction::Shutdown).await
        }

        async fn reboot(&self) -> Result<(), ActionError> {
            self.record(PowerAction::Reboot).await
        }

        async fn is_alive(&self) -> bool {
            !self.fail.load(Ordering::SeqCst)
        }
    }

    pub(crate) struct Harness {
        pub _dir: tempfile::TempDir,
        pub registry: Arc<Registry>,
        pub query: Arc<FakeQuery>,
        pub aggregator: Arc<StatusAggregator>,
        pub power: Arc<FakePower>,
        pub gate: Arc<Gatekeeper>,
    }

    pub(crate) async fn harness(servers: &[(&str, Option<u32>)]) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(Registry::new(dir.path().join("servers.json")));
        let query = FakeQuery::with(&[]);
        for (i, (name, players)) in servers.iter().enumerate() {
            registry
                .add(name, &format!("10.0.0.{}", i + 1), 27015, "STEAM", "")
                .await
                .unwrap();
            if let Some(p) = players {
                query.set(name, *p);
            }
        }
        let aggregator = Arc::new(StatusAggregator::new(registry.clone(), query.clone()));
        let power = Arc::new(FakePower::default());
        let policy = GatePolicy {
            cooldown: Duration::from_secs(300),
            confirm_timeout: CONFIRM_TIMEOUT,
            power_roles: vec!["Gamers".to_string(), "Admins".to_string()],
            sudo_roles: vec!["Admins".to_string()],
        };
        let gate = Arc::new(Gatekeeper::new(aggregator.clone(), power.clone(), policy));
        Harness { _dir: dir, registry, query, aggregator, power, gate }
    }

    pub(crate) fn member(user: &str) -> Claims {
        Claims { sub: user.to_string(), guild: "guild-1".to_string(), roles: vec!["Gamers".to_string()], exp: 0 }
    }

    pub(crate) fn admin(user: &str) -> Claims {
        Claims { sub: user.to_string(), guild: "guild-1".to_string(), roles: vec!["Admins".to_string()], exp: 0 }
    }

    fn prompt_id(outcome: &ActionOutcome) -> Uuid {
        match outcome {
            ActionOutcome::AwaitingConfirmation(prompt) => prompt.id,
            other => panic!("expected a confirmation prompt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn shutdown_refused_while_players_online() {
        let h = harness(&[("A", Some(3))]).await;

        let outcome = h.gate.request(&member("u1"), PowerAction::Shutdown).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::PlayersOnline { .. }));
        assert!(h.power.calls().is_empty());
        assert_eq!(h.gate.cooldown_state("guild-1").await, CooldownState::Ready);
    }

    #[tokio::test]
    async fn idle_shutdown_fires_once_and_blocks_the_whole_group() {
        let h = harness(&[("A", Some(0))]).await;

        let outcome = h.gate.request(&member("u1"), PowerAction::Shutdown).await.unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Executed { action: PowerAction::Shutdown, unconfirmed_servers: vec![] }
        );
        assert_eq!(h.power.calls(), vec![PowerAction::Shutdown]);

        for action in [PowerAction::Boot, PowerAction::Reboot, PowerAction::Shutdown] {
            let outcome = h.gate.request(&member("u2"), action).await.unwrap();
            assert!(matches!(outcome, ActionOutcome::OnCooldown { remaining_secs, .. } if remaining_secs <= 300));
        }
        assert_eq!(h.power.calls().len(), 1);
    }

    #[tokio::test]
    async fn cooldown_is_per_guild() {
        let h = harness(&[]).await;
        h.gate.request(&member("u1"), PowerAction::Boot).await.unwrap();

        let mut elsewhere = member("u2");
        elsewhere.guild = "guild-2".to_string();
        let outcome = h.gate.request(&elsewhere, PowerAction::Boot).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Executed { .. }));
    }

    #[tokio::test]
    async fn boot_ignores_online_players() {
        let h = harness(&[("A", Some(5))]).await;

        let outcome = h.gate.request(&member("u1"), PowerAction::Boot).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Executed { action: PowerAction::Boot, .. }));
    }

    #[tokio::test]
    async fn failed_endpoint_leaves_cooldown_unarmed() {
        let h = harness(&[("A", Some(0))]).await;
        h.power.fail.store(true, Ordering::SeqCst);

        let err = h.gate.request(&member("u1"), PowerAction::Reboot).await.unwrap_err();
        assert!(matches!(err, GateError::ActionFailed { action: PowerAction::Reboot, .. }));
        assert_eq!(h.gate.cooldown_state("guild-1").await, CooldownState::Ready);
    }

    #[tokio::test]
    async fn members_without_role_are_forbidden() {
        let h = harness(&[]).await;
        let stranger = Claims { sub: "x".to_string(), guild: "guild-1".to_string(), roles: vec![], exp: 0 };

        assert!(matches!(h.gate.request(&stranger, PowerAction::Boot).await, Err(GateError::Forbidden(_))));
        assert!(matches!(
            h.gate.request_override(&member("u1"), PowerAction::Boot).await,
            Err(GateError::Forbidden(_))
        ));
        assert!(h.power.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_expires_after_configured_duration() {
        let h = harness(&[]).await;
        h.gate.request(&member("u1"), PowerAction::Boot).await.unwrap();

        tokio::time::advance(Duration::from_secs(120)).await;
        assert_eq!(
            h.gate.cooldown_state("guild-1").await,
            CooldownState::Cooldown { remaining_secs: 180 }
        );

        tokio::time::advance(Duration::from_secs(181)).await;
        assert_eq!(h.gate.cooldown_state("guild-1").await, CooldownState::Ready);
        let outcome = h.gate.request(&member("u1"), PowerAction::Boot).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Executed { .. }));
    }

    #[tokio::test]
    async fn elevated_caller_on_cooldown_is_asked_to_confirm() {
        let h = harness(&[]).await;
        h.gate.request(&member("u1"), PowerAction::Boot).await.unwrap();

        let outcome = h.gate.request(&admin("boss"), PowerAction::Reboot).await.unwrap();
        match outcome {
            ActionOutcome::AwaitingConfirmation(prompt) => {
                assert_eq!(prompt.action, PowerAction::Reboot);
                assert_eq!(prompt.requester, "boss");
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.power.calls(), vec![PowerAction::Boot]);
    }

    #[tokio::test]
    async fn confirmed_override_resets_cooldown_and_skips_player_check() {
        let h = harness(&[("A", Some(3))]).await;
        h.gate.request(&member("u1"), PowerAction::Boot).await.unwrap();

        let prompt = h.gate.request_override(&admin("boss"), PowerAction::Shutdown).await.unwrap();
        let outcome = h.gate.confirm_override(prompt_id(&prompt), &admin("boss")).await.unwrap();

        assert!(matches!(outcome, ActionOutcome::Executed { action: PowerAction::Shutdown, .. }));
        assert_eq!(h.power.calls(), vec![PowerAction::Boot, PowerAction::Shutdown]);
        assert!(matches!(
            h.gate.cooldown_state("guild-1").await,
            CooldownState::Cooldown { remaining_secs } if remaining_secs > 295
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unconfirmed_override_changes_nothing() {
        let h = harness(&[]).await;
        h.gate.request(&member("u1"), PowerAction::Boot).await.unwrap();

        let prompt = h.gate.request_override(&admin("boss"), PowerAction::Reboot).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;

        let late = h.gate.confirm_override(prompt_id(&prompt), &admin("boss")).await;
        assert_eq!(late, Err(GateError::OverrideExpired));
        assert_eq!(h.power.calls(), vec![PowerAction::Boot]);
        assert_eq!(
            h.gate.cooldown_state("guild-1").await,
            CooldownState::Cooldown { remaining_secs: 294 }
        );

        // The expired prompt no longer blocks a new one
        let again = h.gate.request_override(&admin("boss"), PowerAction::Reboot).await.unwrap();
        assert!(matches!(again, ActionOutcome::AwaitingConfirmation(_)));
    }

    #[tokio::test]
    async fn only_the_requester_can_confirm() {
        let h = harness(&[]).await;
        let prompt = h.gate.request_override(&admin("boss"), PowerAction::Boot).await.unwrap();
        let id = prompt_id(&prompt);

        assert_eq!(h.gate.confirm_override(id, &admin("other")).await, Err(GateError::NotRequester));
        assert!(h.power.calls().is_empty());

        let outcome = h.gate.confirm_override(id, &admin("boss")).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::Executed { .. }));
        assert_eq!(h.gate.confirm_override(id, &admin("boss")).await, Err(GateError::OverrideExpired));
    }

    #[tokio::test]
    async fn concurrent_overrides_in_one_guild_are_serialized() {
        let h = harness(&[]).await;
        h.gate.request_override(&admin("boss"), PowerAction::Boot).await.unwrap();

        let second = h.gate.request_override(&admin("other"), PowerAction::Shutdown).await;
        assert_eq!(second, Err(GateError::OverridePending));
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_commands_fire_once() {
        let h = harness(&[("A", Some(0))]).await;
        h.power.slow.store(true, Ordering::SeqCst);

        let (u1, u2) = (member("u1"), member("u2"));
        let (first, second) = tokio::join!(
            h.gate.request(&u1, PowerAction::Shutdown),
            h.gate.request(&u2, PowerAction::Shutdown),
        );
        let outcomes = [first.unwrap(), second.unwrap()];

        let executed = outcomes.iter().filter(|o| matches!(o, ActionOutcome::Executed { .. })).count();
        let refused = outcomes.iter().filter(|o| matches!(o, ActionOutcome::OnCooldown { .. })).count();
        assert_eq!((executed, refused), (1, 1));
        assert_eq!(h.power.calls(), vec![PowerAction::Shutdown]);
    }

    #[tokio::test]
    async fn simultaneous_overrides_post_one_prompt() {
        let h = harness(&[]).await;

        let (boss, other) = (admin("boss"), admin("other"));
        let (first, second) = tokio::join!(
            h.gate.request_override(&boss, PowerAction::Reboot),
            h.gate.request_override(&other, PowerAction::Shutdown),
        );
        let results = [first, second];

        let prompts = results
            .iter()
            .filter(|r| matches!(r, Ok(ActionOutcome::AwaitingConfirmation(_))))
            .count();
        let pending = results.iter().filter(|r| **r == Err(GateError::OverridePending)).count();
        assert_eq!((prompts, pending), (1, 1));
        assert!(h.power.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_action_does_not_block_other_guilds() {
        let h = harness(&[]).await;
        h.power.slow.store(true, Ordering::SeqCst);
        let mut elsewhere = member("u2");
        elsewhere.guild = "guild-2".to_string();
        let started = Instant::now();

        let u1 = member("u1");
        let (first, (state, checked_after)) = tokio::join!(h.gate.request(&u1, PowerAction::Boot), async {
            let state = h.gate.cooldown_state("guild-2").await;
            (state, started.elapsed())
        });
        assert!(matches!(first.unwrap(), ActionOutcome::Executed { .. }));
        assert_eq!(state, CooldownState::Ready);
        assert!(checked_after < Duration::from_secs(1));

        // Two guilds firing together run side by side
        h.power.calls.lock().unwrap().clear();
        let mut third = member("u3");
        third.guild = "guild-3".to_string();
        let started = Instant::now();
        let (a, b) = tokio::join!(
            h.gate.request(&elsewhere, PowerAction::Boot),
            h.gate.request(&third, PowerAction::Boot),
        );
        assert!(matches!(a.unwrap(), ActionOutcome::Executed { .. }));
        assert!(matches!(b.unwrap(), ActionOutcome::Executed { .. }));
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(h.power.calls().len(), 2);
    }

    #[tokio::test]
    async fn worked_example() {
        let h = harness(&[("A", Some(3)), ("B", None)]).await;

        let outcome = h.gate.request(&member("u1"), PowerAction::Reboot).await.unwrap();
        assert!(matches!(outcome, ActionOutcome::PlayersOnline { ref failed_servers, .. } if failed_servers == &vec!["B".to_string()]));

        h.registry.delete("A").await.unwrap();
        let outcome = h.gate.request(&member("u1"), PowerAction::Reboot).await.unwrap();
        assert_eq!(
            outcome,
            ActionOutcome::Executed { action: PowerAction::Reboot, unconfirmed_servers: vec!["B".to_string()] }
        );
        assert_eq!(h.power.calls(), vec![PowerAction::Reboot]);

        for action in [PowerAction::Boot, PowerAction::Shutdown] {
            let outcome = h.gate.request(&member("u1"), action).await.unwrap();
            assert!(matches!(outcome, ActionOutcome::OnCooldown { .. }));
        }

        // Players joining later doesn't matter while the cooldown holds
        h.query.set("B", 2);
        assert_eq!(h.power.calls().len(), 1);
    }
}
