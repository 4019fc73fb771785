//! Restart policy and exit classification.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What to do when a child exits on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    Always,
    OnFailure,
    Never,
}

impl RestartMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "always" => Some(Self::Always),
            "on-failure" => Some(Self::OnFailure),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::OnFailure => "on-failure",
            Self::Never => "never",
        }
    }
}

impl std::fmt::Display for RestartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restart policy for one managed process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub mode: RestartMode,
    /// Maximum restart attempts; 0 means unlimited.
    pub max_restarts: u32,
    /// A run at least this long resets the restart counter.
    pub min_uptime: Duration,
    /// Base delay before a re-spawn.
    pub restart_delay: Duration,
    /// Double the delay per consecutive restart (`base << counter`).
    pub exp_backoff: bool,
    /// Upper bound on the computed delay.
    pub max_delay: Option<Duration>,
    /// How long `stop` waits before escalating to SIGKILL.
    pub kill_timeout: Duration,
    /// When non-empty, only these exit codes restart.
    pub restart_exit_codes: Vec<i32>,
    /// These exit codes never restart.
    pub no_restart_exit_codes: Vec<i32>,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            mode: RestartMode::OnFailure,
            max_restarts: 0,
            min_uptime: Duration::from_secs(10),
            restart_delay: Duration::from_secs(1),
            exp_backoff: false,
            max_delay: None,
            kill_timeout: Duration::from_secs(5),
            restart_exit_codes: Vec::new(),
            no_restart_exit_codes: Vec::new(),
        }
    }
}

/// Outcome of classifying a self-initiated exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    /// Terminal clean stop.
    Stop,
    /// Terminal failure.
    Fail,
    /// Re-spawn after `delay`. `reset_counter` means the run lasted at
    /// least `min_uptime`, so the counter goes back to zero first.
    Restart {
        delay: Duration,
        reset_counter: bool,
    },
}

/// Classifies an exit against the policy.
///
/// `restarts` is the current consecutive-restart counter; `ran_for` is the
/// actual run duration since the uptime anchor.
pub fn classify_exit(
    policy: &RestartPolicy,
    exit_code: i32,
    ran_for: Duration,
    restarts: u32,
) -> ExitDecision {
    if policy.mode == RestartMode::Never {
        return ExitDecision::Stop;
    }
    if policy.mode == RestartMode::OnFailure && exit_code == 0 {
        return ExitDecision::Stop;
    }
    if policy.no_restart_exit_codes.contains(&exit_code) {
        return ExitDecision::Stop;
    }
    if !policy.restart_exit_codes.is_empty() && !policy.restart_exit_codes.contains(&exit_code) {
        return ExitDecision::Fail;
    }

    let reset_counter = ran_for >= policy.min_uptime;
    let effective = if reset_counter { 0 } else { restarts };

    if policy.max_restarts > 0 && effective >= policy.max_restarts {
        return ExitDecision::Fail;
    }

    ExitDecision::Restart {
        delay: backoff_delay(policy, effective),
        reset_counter,
    }
}

/// Computes the re-spawn delay: the base when backoff is off, otherwise
/// `base << counter`, capped by `max_delay` when set.
fn backoff_delay(policy: &RestartPolicy, counter: u32) -> Duration {
    let base_ms = policy.restart_delay.as_millis() as u64;
    let mut delay_ms = if policy.exp_backoff {
        // Shift is clamped so huge counters saturate instead of overflowing.
        base_ms.saturating_mul(1u64 << counter.min(20))
    } else {
        base_ms
    };

    if let Some(cap) = policy.max_delay {
        delay_ms = delay_ms.min(cap.as_millis() as u64);
    }
    Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(mode: RestartMode) -> RestartPolicy {
        RestartPolicy {
            mode,
            restart_delay: Duration::from_millis(100),
            min_uptime: Duration::from_secs(10),
            ..Default::default()
        }
    }

    const SHORT_RUN: Duration = Duration::from_secs(1);

    #[test]
    fn test_never_stops() {
        let p = policy(RestartMode::Never);
        assert_eq!(classify_exit(&p, 1, SHORT_RUN, 0), ExitDecision::Stop);
    }

    #[test]
    fn test_on_failure_clean_exit_stops() {
        let p = policy(RestartMode::OnFailure);
        assert_eq!(classify_exit(&p, 0, SHORT_RUN, 0), ExitDecision::Stop);
        assert!(matches!(
            classify_exit(&p, 1, SHORT_RUN, 0),
            ExitDecision::Restart { .. }
        ));
    }

    #[test]
    fn test_always_restarts_clean_exit() {
        let p = policy(RestartMode::Always);
        assert!(matches!(
            classify_exit(&p, 0, SHORT_RUN, 0),
            ExitDecision::Restart { .. }
        ));
    }

    #[test]
    fn test_exclude_set_stops() {
        let mut p = policy(RestartMode::Always);
        p.no_restart_exit_codes = vec![7];
        assert_eq!(classify_exit(&p, 7, SHORT_RUN, 0), ExitDecision::Stop);
        assert!(matches!(
            classify_exit(&p, 8, SHORT_RUN, 0),
            ExitDecision::Restart { .. }
        ));
    }

    #[test]
    fn test_include_set_fails_others() {
        let mut p = policy(RestartMode::Always);
        p.restart_exit_codes = vec![1, 2];
        assert!(matches!(
            classify_exit(&p, 2, SHORT_RUN, 0),
            ExitDecision::Restart { .. }
        ));
        assert_eq!(classify_exit(&p, 3, SHORT_RUN, 0), ExitDecision::Fail);
    }

    #[test]
    fn test_max_restarts_exhausted() {
        let mut p = policy(RestartMode::OnFailure);
        p.max_restarts = 2;
        assert!(matches!(
            classify_exit(&p, 1, SHORT_RUN, 1),
            ExitDecision::Restart { .. }
        ));
        assert_eq!(classify_exit(&p, 1, SHORT_RUN, 2), ExitDecision::Fail);
    }

    #[test]
    fn test_long_run_resets_counter() {
        let mut p = policy(RestartMode::OnFailure);
        p.max_restarts = 2;
        // Counter is past the limit, but the run exceeded min_uptime.
        let d = classify_exit(&p, 1, Duration::from_secs(60), 5);
        assert_eq!(
            d,
            ExitDecision::Restart {
                delay: Duration::from_millis(100),
                reset_counter: true
            }
        );
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let mut p = policy(RestartMode::Always);
        p.exp_backoff = true;
        p.max_delay = Some(Duration::from_millis(250));

        match classify_exit(&p, 1, SHORT_RUN, 0) {
            ExitDecision::Restart { delay, .. } => assert_eq!(delay, Duration::from_millis(100)),
            d => panic!("unexpected {:?}", d),
        }
        match classify_exit(&p, 1, SHORT_RUN, 1) {
            ExitDecision::Restart { delay, .. } => assert_eq!(delay, Duration::from_millis(200)),
            d => panic!("unexpected {:?}", d),
        }
        match classify_exit(&p, 1, SHORT_RUN, 2) {
            // 400ms capped at 250ms
            ExitDecision::Restart { delay, .. } => assert_eq!(delay, Duration::from_millis(250)),
            d => panic!("unexpected {:?}", d),
        }
    }

    #[test]
    fn test_mode_strings() {
        assert_eq!(RestartMode::parse("always"), Some(RestartMode::Always));
        assert_eq!(RestartMode::parse("on-failure"), Some(RestartMode::OnFailure));
        assert_eq!(RestartMode::parse("never"), Some(RestartMode::Never));
        assert_eq!(RestartMode::parse("sometimes"), None);
        assert_eq!(RestartMode::OnFailure.to_string(), "on-failure");
    }
}
