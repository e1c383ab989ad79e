// Thread Budget
//
// Safe CPU thread allocation across concurrent sessions. The budget is a
// preset share of detected logical cores; `status` is a pure function of the
// thread requests of the active sessions.

use crate::error::{MinerError, Result};
use crate::types::PerformancePreset;
use serde::{Deserialize, Serialize};
use sysinfo::System;

/// How the budget is applied at admission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetMode {
    Off,
    #[default]
    WarnOnly,
    AutoDistribute, // derive thread hints for new sessions from the remaining share
    EnforceLimit,   // reject admissions that would exceed the budget
}

/// Budget snapshot for the presentation layer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetStatus {
    pub effective_cores: u32,
    pub budget_threads: u32,
    pub total_requested: u32,
    pub is_overcommitted: bool,
    pub overcommit_ratio: f64,
    pub suggested_per_session: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadBudget {
    cores: u32,
}

impl ThreadBudget {
    /// Detect logical cores via sysinfo
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();
        let mut cores = sys.cpus().len() as u32;
        if cores == 0 {
            cores = std::thread::available_parallelism()
                .map(|n| n.get() as u32)
                .unwrap_or(1);
        }
        Self::with_cores(cores)
    }

    pub fn with_cores(cores: u32) -> Self {
        Self { cores: cores.max(1) }
    }

    pub fn cores(&self) -> u32 {
        self.cores
    }

    /// Thread cap for a preset (floor, at least 1)
    pub fn budget(&self, preset: PerformancePreset) -> u32 {
        ((self.cores as f64 * preset.core_factor()).floor() as u32).max(1)
    }

    /// Budget status for the thread requests of all Running/Suspended sessions
    pub fn status(&self, preset: PerformancePreset, requests: &[u32]) -> BudgetStatus {
        let budget_threads = self.budget(preset);
        let total_requested: u32 = requests.iter().sum();
        let session_count = (requests.len() as u32).max(1);

        BudgetStatus {
            effective_cores: self.cores,
            budget_threads,
            total_requested,
            is_overcommitted: total_requested > budget_threads,
            overcommit_ratio: total_requested as f64 / budget_threads as f64,
            suggested_per_session: (budget_threads / session_count).max(1),
        }
    }

    /// Threads to give a session that asked for none
    pub fn resolve_hint(
        &self,
        mode: BudgetMode,
        preset: PerformancePreset,
        active_sessions: usize,
        hint: u32,
    ) -> u32 {
        if hint > 0 {
            return hint;
        }
        let budget = self.budget(preset);
        match mode {
            BudgetMode::AutoDistribute => (budget / (active_sessions as u32 + 1)).max(1),
            _ => budget,
        }
    }

    /// Admission check for a new session requesting `threads`
    pub fn admit(
        &self,
        mode: BudgetMode,
        preset: PerformancePreset,
        requests: &[u32],
        threads: u32,
    ) -> Result<()> {
        if mode != BudgetMode::EnforceLimit {
            return Ok(());
        }
        let budget = self.budget(preset);
        let requested = requests.iter().sum::<u32>() + threads;
        if requested > budget {
            return Err(MinerError::BudgetExceeded { requested, budget });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_presets_on_eight_cores() {
        let budget = ThreadBudget::with_cores(8);
        assert_eq!(budget.budget(PerformancePreset::Eco), 4);
        assert_eq!(budget.budget(PerformancePreset::Balanced), 6);
        assert_eq!(budget.budget(PerformancePreset::Max), 8);
    }

    #[test]
    fn test_budget_floor_of_one() {
        let budget = ThreadBudget::with_cores(1);
        assert_eq!(budget.budget(PerformancePreset::Eco), 1);
        assert_eq!(ThreadBudget::with_cores(0).cores(), 1);
    }

    #[test]
    fn test_status_is_pure() {
        let budget = ThreadBudget::with_cores(8);
        let requests = [4, 4];
        let a = budget.status(PerformancePreset::Balanced, &requests);
        let b = budget.status(PerformancePreset::Balanced, &requests);
        assert_eq!(a, b);
        assert!(a.is_overcommitted);
        assert_eq!(a.total_requested, 8);
        assert_eq!(a.suggested_per_session, 3);
        assert!((a.overcommit_ratio - 8.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_status_without_sessions() {
        let status = ThreadBudget::with_cores(4).status(PerformancePreset::Max, &[]);
        assert!(!status.is_overcommitted);
        assert_eq!(status.suggested_per_session, 4);
        assert_eq!(status.overcommit_ratio, 0.0);
    }

    #[test]
    fn test_enforce_limit_rejects_overcommit() {
        let budget = ThreadBudget::with_cores(8);
        let preset = PerformancePreset::Balanced;
        assert!(budget.admit(BudgetMode::EnforceLimit, preset, &[], 4).is_ok());
        let err = budget
            .admit(BudgetMode::EnforceLimit, preset, &[4], 4)
            .unwrap_err();
        assert!(matches!(err, MinerError::BudgetExceeded { requested: 8, budget: 6 }));

        assert!(budget.admit(BudgetMode::WarnOnly, preset, &[4], 4).is_ok());
        assert!(budget.admit(BudgetMode::Off, preset, &[4], 40).is_ok());
    }

    #[test]
    fn test_resolve_hint() {
        let budget = ThreadBudget::with_cores(8);
        let preset = PerformancePreset::Balanced;
        assert_eq!(budget.resolve_hint(BudgetMode::WarnOnly, preset, 2, 3), 3);
        assert_eq!(budget.resolve_hint(BudgetMode::WarnOnly, preset, 2, 0), 6);
        assert_eq!(budget.resolve_hint(BudgetMode::AutoDistribute, preset, 1, 0), 3);
    }

    #[test]
    fn test_detect_finds_cores() {
        assert!(ThreadBudget::detect().cores() >= 1);
    }
}
