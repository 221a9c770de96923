//! Graceful degradation
//!
//! Self-assessed operational tiers from Normal down to Emergency. Rules
//! decide when to degrade; level-registered actions adjust the scanner
//! through a shared `ScanControls` handle instead of holding a reference
//! back into the orchestrator. Recovery requires every rule to be clear
//! plus a stability window since the last transition.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const HISTORY_CAP: usize = 100;

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DegradationLevel {
    Normal,
    Light,
    Moderate,
    Severe,
    Emergency,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DegradationLevel::Normal => "normal",
            DegradationLevel::Light => "light",
            DegradationLevel::Moderate => "moderate",
            DegradationLevel::Severe => "severe",
            DegradationLevel::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Shared knobs the scanner reads on every scan.
///
/// Degradation actions flip these atomics; the orchestrator never hands
/// out a reference to itself.
pub struct ScanControls {
    concurrency_percent: AtomicU32,
    caching_enabled: AtomicBool,
    essential_patterns_only: AtomicBool,
    emergency: AtomicBool,
}

impl ScanControls {
    pub fn new() -> Self {
        ScanControls {
            concurrency_percent: AtomicU32::new(100),
            caching_enabled: AtomicBool::new(true),
            essential_patterns_only: AtomicBool::new(false),
            emergency: AtomicBool::new(false),
        }
    }

    pub fn set_concurrency_percent(&self, percent: u32) {
        self.concurrency_percent.store(percent.clamp(1, 100), Ordering::SeqCst);
    }

    /// Applies the current concurrency scale to a configured limit.
    pub fn scale_concurrency(&self, limit: usize) -> usize {
        let percent = self.concurrency_percent.load(Ordering::SeqCst) as usize;
        (limit * percent / 100).max(1)
    }

    pub fn set_caching_enabled(&self, enabled: bool) {
        self.caching_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn caching_enabled(&self) -> bool {
        self.caching_enabled.load(Ordering::SeqCst)
    }

    pub fn set_essential_patterns_only(&self, essential: bool) {
        self.essential_patterns_only.store(essential, Ordering::SeqCst);
    }

    pub fn essential_patterns_only(&self) -> bool {
        self.essential_patterns_only.load(Ordering::SeqCst)
    }

    pub fn set_emergency(&self, emergency: bool) {
        self.emergency.store(emergency, Ordering::SeqCst);
    }

    pub fn emergency(&self) -> bool {
        self.emergency.load(Ordering::SeqCst)
    }
}

impl Default for ScanControls {
    fn default() -> Self {
        Self::new()
    }
}

/// When to degrade: a predicate plus its target tier.
pub struct DegradationRule {
    pub name: String,
    condition: Box<dyn Fn() -> bool + Send + Sync>,
    pub target_level: DegradationLevel,
    pub priority: i32,
    pub cooldown: Duration,
    last_triggered: Option<Instant>,
}

/// What to do at a tier, with an optional rollback for recovery.
pub struct DegradationAction {
    pub name: String,
    pub description: String,
    apply: Box<dyn Fn() + Send + Sync>,
    rollback: Option<Box<dyn Fn() + Send + Sync>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: DegradationLevel,
    pub to: DegradationLevel,
    pub reason: String,
    pub timestamp: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct DegradationStatus {
    pub level: DegradationLevel,
    pub active_actions: Vec<String>,
    pub seconds_since_transition: f64,
    pub transitions_recorded: usize,
}

struct ManagerState {
    current_level: DegradationLevel,
    last_transition: Instant,
    active_actions: Vec<(DegradationLevel, String)>,
    history: VecDeque<TransitionRecord>,
}

pub struct DegradationManager {
    controls: Arc<ScanControls>,
    rules: Mutex<Vec<DegradationRule>>,
    actions: Mutex<HashMap<DegradationLevel, Vec<DegradationAction>>>,
    state: Mutex<ManagerState>,
    stability_period: Duration,
    check_interval: Duration,
    monitoring: AtomicBool,
}

impl DegradationManager {
    pub fn new(controls: Arc<ScanControls>) -> Self {
        Self::with_timing(controls, Duration::from_secs(300), Duration::from_secs(60))
    }

    pub fn with_timing(
        controls: Arc<ScanControls>,
        stability_period: Duration,
        check_interval: Duration,
    ) -> Self {
        let manager = DegradationManager {
            controls,
            rules: Mutex::new(Vec::new()),
            actions: Mutex::new(HashMap::new()),
            state: Mutex::new(ManagerState {
                current_level: DegradationLevel::Normal,
                last_transition: Instant::now(),
                active_actions: Vec::new(),
                history: VecDeque::new(),
            }),
            stability_period,
            check_interval,
            monitoring: AtomicBool::new(false),
        };
        manager.register_default_actions();
        manager
    }

    pub fn controls(&self) -> Arc<ScanControls> {
        self.controls.clone()
    }

    pub fn current_level(&self) -> DegradationLevel {
        self.state.lock().current_level
    }

    pub fn add_rule(
        &self,
        name: impl Into<String>,
        condition: impl Fn() -> bool + Send + Sync + 'static,
        target_level: DegradationLevel,
        priority: i32,
        cooldown: Duration,
    ) {
        let mut rules = self.rules.lock();
        rules.push(DegradationRule {
            name: name.into(),
            condition: Box::new(condition),
            target_level,
            priority,
            cooldown,
            last_triggered: None,
        });
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    pub fn add_action(
        &self,
        level: DegradationLevel,
        name: impl Into<String>,
        description: impl Into<String>,
        apply: impl Fn() + Send + Sync + 'static,
        rollback: Option<Box<dyn Fn() + Send + Sync>>,
    ) {
        self.actions.lock().entry(level).or_default().push(DegradationAction {
            name: name.into(),
            description: description.into(),
            apply: Box::new(apply),
            rollback,
        });
    }

    /// Wires the standard per-tier actions onto the shared controls.
    fn register_default_actions(&self) {
        let controls = self.controls.clone();
        let rollback = self.controls.clone();
        self.add_action(
            DegradationLevel::Light,
            "reduce_concurrency",
            "Halve concurrent probe capacity",
            move || controls.set_concurrency_percent(50),
            Some(Box::new(move || rollback.set_concurrency_percent(100))),
        );

        let controls = self.controls.clone();
        let rollback = self.controls.clone();
        self.add_action(
            DegradationLevel::Light,
            "disable_caching",
            "Disable result caching to conserve memory",
            move || controls.set_caching_enabled(false),
            Some(Box::new(move || rollback.set_caching_enabled(true))),
        );

        let controls = self.controls.clone();
        let rollback = self.controls.clone();
        self.add_action(
            DegradationLevel::Moderate,
            "limit_patterns",
            "Run only essential attack patterns",
            move || controls.set_essential_patterns_only(true),
            Some(Box::new(move || rollback.set_essential_patterns_only(false))),
        );

        let controls = self.controls.clone();
        let rollback = self.controls.clone();
        self.add_action(
            DegradationLevel::Severe,
            "emergency_mode",
            "Enable emergency-only operation",
            move || controls.set_emergency(true),
            Some(Box::new(move || rollback.set_emergency(false))),
        );

        let controls = self.controls.clone();
        let rollback = self.controls.clone();
        self.add_action(
            DegradationLevel::Emergency,
            "emergency_mode",
            "Enable emergency-only operation",
            move || controls.set_emergency(true),
            Some(Box::new(move || rollback.set_emergency(false))),
        );
    }

    /// One evaluation pass: degrade when a rule fires, recover when all
    /// rules are clear and the stability window has elapsed.
    pub fn evaluate_once(&self) {
        let target = {
            let mut rules = self.rules.lock();
            let now = Instant::now();
            let mut target: Option<(DegradationLevel, String)> = None;
            for rule in rules.iter_mut() {
                let cooling = rule
                    .last_triggered
                    .map(|t| now.duration_since(t) < rule.cooldown)
                    .unwrap_or(false);
                if cooling || !(rule.condition)() {
                    continue;
                }
                rule.last_triggered = Some(now);
                let replace = match &target {
                    Some((level, _)) => *level < rule.target_level,
                    None => true,
                };
                if replace {
                    target = Some((rule.target_level, rule.name.clone()));
                }
            }
            target
        };

        match target {
            Some((level, rule_name)) => self.degrade_to(level, &format!("rule '{}'", rule_name)),
            None => self.maybe_recover(),
        }
    }

    fn degrade_to(&self, target: DegradationLevel, reason: &str) {
        let current = self.current_level();
        if target <= current {
            return;
        }
        warn!("📉 [Degradation] {} -> {} ({})", current, target, reason);
        self.apply_level(target, reason);
    }

    fn apply_level(&self, target: DegradationLevel, reason: &str) {
        let actions = self.actions.lock();
        let mut applied = Vec::new();
        if let Some(level_actions) = actions.get(&target) {
            for action in level_actions {
                (action.apply)();
                info!("📉 [Degradation] Applied action: {}", action.name);
                applied.push((target, action.name.clone()));
            }
        }
        drop(actions);

        let mut state = self.state.lock();
        let from = state.current_level;
        state.current_level = target;
        state.last_transition = Instant::now();
        state.active_actions.extend(applied);
        Self::record_transition(&mut state, from, target, reason);
    }

    /// Recovery needs all rule conditions clear AND a full stability
    /// window since the last transition.
    fn maybe_recover(&self) {
        let past_stability = {
            let state = self.state.lock();
            state.current_level != DegradationLevel::Normal
                && state.last_transition.elapsed() >= self.stability_period
        };
        if !past_stability {
            return;
        }
        // Cooldowns only gate re-triggering; a condition that still holds
        // must keep blocking recovery, so every condition is re-read here
        // regardless of its rule's cooldown state.
        let blocking = {
            let rules = self.rules.lock();
            rules
                .iter()
                .find(|rule| (rule.condition)())
                .map(|rule| rule.name.clone())
        };
        match blocking {
            Some(rule_name) => {
                info!(
                    "📉 [Degradation] Recovery blocked: rule '{}' still active",
                    rule_name
                );
            }
            None => self.recover("stability window elapsed"),
        }
    }

    fn recover(&self, reason: &str) {
        let rollbacks: Vec<(DegradationLevel, String)> = {
            let mut state = self.state.lock();
            std::mem::take(&mut state.active_actions)
        };

        let actions = self.actions.lock();
        for (level, name) in rollbacks.iter().rev() {
            if let Some(level_actions) = actions.get(level) {
                for action in level_actions.iter().filter(|a| &a.name == name) {
                    if let Some(rollback) = &action.rollback {
                        rollback();
                        info!("📈 [Degradation] Rolled back action: {}", action.name);
                    }
                }
            }
        }
        drop(actions);

        let mut state = self.state.lock();
        let from = state.current_level;
        state.current_level = DegradationLevel::Normal;
        state.last_transition = Instant::now();
        info!("📈 [Degradation] Recovered: {} -> normal ({})", from, reason);
        Self::record_transition(&mut state, from, DegradationLevel::Normal, reason);
    }

    /// Operator override: jump straight to a tier.
    pub fn force_degradation(&self, level: DegradationLevel, reason: &str) {
        warn!("🚨 [Degradation] Forced to {} ({})", level, reason);
        if level == DegradationLevel::Normal {
            self.recover(reason);
        } else {
            self.apply_level(level, reason);
        }
    }

    /// Operator override: roll everything back to Normal.
    pub fn force_recovery(&self, reason: &str) {
        if self.current_level() != DegradationLevel::Normal {
            self.recover(reason);
        }
    }

    pub fn status(&self) -> DegradationStatus {
        let state = self.state.lock();
        DegradationStatus {
            level: state.current_level,
            active_actions: state
                .active_actions
                .iter()
                .map(|(_, name)| name.clone())
                .collect(),
            seconds_since_transition: state.last_transition.elapsed().as_secs_f64(),
            transitions_recorded: state.history.len(),
        }
    }

    pub fn history(&self) -> Vec<TransitionRecord> {
        self.state.lock().history.iter().cloned().collect()
    }

    fn record_transition(
        state: &mut ManagerState,
        from: DegradationLevel,
        to: DegradationLevel,
        reason: &str,
    ) {
        if state.history.len() >= HISTORY_CAP {
            state.history.pop_front();
        }
        state.history.push_back(TransitionRecord {
            from,
            to,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis() as f64 / 1000.0,
        });
    }

    /// Spawns the background evaluation loop.
    pub fn spawn_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        self.monitoring.store(true, Ordering::SeqCst);
        let manager = self.clone();
        tokio::spawn(async move {
            info!("📉 [Degradation] Monitor started");
            while manager.monitoring.load(Ordering::SeqCst) {
                manager.evaluate_once();
                tokio::time::sleep(manager.check_interval).await;
            }
            info!("📉 [Degradation] Monitor stopped");
        })
    }

    pub fn stop_monitor(&self) {
        self.monitoring.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_manager() -> (Arc<ScanControls>, DegradationManager) {
        let controls = Arc::new(ScanControls::new());
        let manager = DegradationManager::with_timing(
            controls.clone(),
            Duration::from_millis(20),
            Duration::from_millis(5),
        );
        (controls, manager)
    }

    #[test]
    fn levels_are_ordered() {
        assert!(DegradationLevel::Emergency > DegradationLevel::Severe);
        assert!(DegradationLevel::Light > DegradationLevel::Normal);
    }

    #[test]
    fn triggered_rule_degrades_and_applies_actions() {
        let (controls, manager) = fast_manager();
        manager.add_rule(
            "always",
            || true,
            DegradationLevel::Light,
            1,
            Duration::from_secs(3600),
        );
        manager.evaluate_once();
        assert_eq!(manager.current_level(), DegradationLevel::Light);
        assert!(!controls.caching_enabled());
        assert_eq!(controls.scale_concurrency(10), 5);
    }

    #[test]
    fn highest_severity_rule_wins() {
        let (controls, manager) = fast_manager();
        manager.add_rule("light", || true, DegradationLevel::Light, 5, Duration::ZERO);
        manager.add_rule("severe", || true, DegradationLevel::Severe, 1, Duration::ZERO);
        manager.evaluate_once();
        assert_eq!(manager.current_level(), DegradationLevel::Severe);
        assert!(controls.emergency());
    }

    #[test]
    fn recovery_waits_for_stability_window() {
        let (controls, manager) = fast_manager();
        let gate = Arc::new(AtomicBool::new(true));
        let condition = gate.clone();
        manager.add_rule(
            "gated",
            move || condition.load(Ordering::SeqCst),
            DegradationLevel::Light,
            1,
            Duration::ZERO,
        );
        manager.evaluate_once();
        assert_eq!(manager.current_level(), DegradationLevel::Light);

        gate.store(false, Ordering::SeqCst);
        manager.evaluate_once();
        // Still inside the stability window.
        assert_eq!(manager.current_level(), DegradationLevel::Light);

        std::thread::sleep(Duration::from_millis(30));
        manager.evaluate_once();
        assert_eq!(manager.current_level(), DegradationLevel::Normal);
        assert!(controls.caching_enabled());
        assert_eq!(controls.scale_concurrency(10), 10);
    }

    #[test]
    fn still_true_condition_blocks_recovery_despite_cooldown() {
        let (controls, manager) = fast_manager();
        manager.add_rule(
            "sustained",
            || true,
            DegradationLevel::Light,
            1,
            Duration::from_secs(3600),
        );
        manager.evaluate_once();
        assert_eq!(manager.current_level(), DegradationLevel::Light);

        std::thread::sleep(Duration::from_millis(30));
        // The rule sits inside its cooldown, but its condition still
        // holds, so the elapsed stability window must not trigger recovery.
        manager.evaluate_once();
        assert_eq!(manager.current_level(), DegradationLevel::Light);
        assert!(!controls.caching_enabled());
        assert_eq!(controls.scale_concurrency(10), 5);
    }

    #[test]
    fn force_overrides() {
        let (controls, manager) = fast_manager();
        manager.force_degradation(DegradationLevel::Emergency, "operator");
        assert_eq!(manager.current_level(), DegradationLevel::Emergency);
        assert!(controls.emergency());

        manager.force_recovery("operator");
        assert_eq!(manager.current_level(), DegradationLevel::Normal);
        assert!(!controls.emergency());
    }

    #[test]
    fn history_is_bounded() {
        let (_, manager) = fast_manager();
        for _ in 0..120 {
            manager.force_degradation(DegradationLevel::Light, "loop");
            manager.force_recovery("loop");
        }
        assert!(manager.history().len() <= HISTORY_CAP);
    }

    #[test]
    fn rule_cooldown_suppresses_retrigger() {
        let (_, manager) = fast_manager();
        manager.add_rule(
            "cooled",
            || true,
            DegradationLevel::Light,
            1,
            Duration::from_secs(3600),
        );
        manager.evaluate_once();
        manager.force_recovery("test");
        // Rule is inside its cooldown, so nothing fires.
        manager.evaluate_once();
        assert_eq!(manager.current_level(), DegradationLevel::Normal);
    }

    #[tokio::test]
    async fn monitor_loop_runs_and_stops() {
        let controls = Arc::new(ScanControls::new());
        let manager = Arc::new(DegradationManager::with_timing(
            controls,
            Duration::from_millis(500),
            Duration::from_millis(5),
        ));
        manager.add_rule("always", || true, DegradationLevel::Light, 1, Duration::ZERO);
        let handle = manager.spawn_monitor();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(manager.current_level(), DegradationLevel::Light);
        manager.stop_monitor();
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.abort();
    }
}
