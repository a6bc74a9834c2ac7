//! Set-style assertions over actual LRPs.

use std::fmt;

use vizzini_models::{ActualLrp, ActualLrpState};

/// Matches one actual LRP by index and, optionally, state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActualLrpMatcher {
    pub index: i32,
    pub state: Option<ActualLrpState>,
}

impl ActualLrpMatcher {
    pub fn index(index: i32) -> Self {
        Self { index, state: None }
    }

    pub fn running(index: i32) -> Self {
        Self {
            index,
            state: Some(ActualLrpState::Running),
        }
    }

    pub fn matches(&self, lrp: &ActualLrp) -> bool {
        lrp.index() == self.index && self.state.map_or(true, |state| lrp.state == state)
    }
}

impl fmt::Display for ActualLrpMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.state {
            Some(state) => write!(f, "{}:{}", self.index, state.as_str()),
            None => write!(f, "{}:*", self.index),
        }
    }
}

/// True when every record matches exactly one matcher and vice versa.
pub fn consist_of(actuals: &[ActualLrp], matchers: &[ActualLrpMatcher]) -> bool {
    if actuals.len() != matchers.len() {
        return false;
    }
    let mut used = vec![false; actuals.len()];
    matchers.iter().all(|matcher| {
        match actuals
            .iter()
            .enumerate()
            .find(|(i, lrp)| !used[*i] && matcher.matches(lrp))
        {
            Some((i, _)) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

/// `n` running instances at indices `[0, n)`.
pub fn running_range(n: i32) -> Vec<ActualLrpMatcher> {
    (0..n).map(ActualLrpMatcher::running).collect()
}

/// Compact `index:state` summary for failure messages.
pub fn describe(actuals: &[ActualLrp]) -> String {
    let parts: Vec<String> = actuals
        .iter()
        .map(|lrp| format!("{}:{}", lrp.index(), lrp.state.as_str()))
        .collect();
    format!("[{}]", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vizzini_id::ProcessGuid;
    use vizzini_models::ActualLrpKey;

    fn actual(guid: ProcessGuid, index: i32, state: ActualLrpState) -> ActualLrp {
        let mut lrp = ActualLrp::unclaimed(ActualLrpKey::new(guid, index, "vizzini"));
        lrp.state = state;
        lrp
    }

    #[test]
    fn test_consist_of_ignores_order() {
        let guid = ProcessGuid::new();
        let actuals = vec![
            actual(guid, 1, ActualLrpState::Running),
            actual(guid, 0, ActualLrpState::Running),
        ];
        assert!(consist_of(&actuals, &running_range(2)));
    }

    #[test]
    fn test_consist_of_requires_state_and_count() {
        let guid = ProcessGuid::new();
        let actuals = vec![
            actual(guid, 0, ActualLrpState::Running),
            actual(guid, 1, ActualLrpState::Claimed),
        ];
        assert!(!consist_of(&actuals, &running_range(2)));
        assert!(!consist_of(&actuals, &running_range(1)));
        assert!(consist_of(
            &actuals,
            &[ActualLrpMatcher::running(0), ActualLrpMatcher::index(1)]
        ));
        assert_eq!(describe(&actuals), "[0:RUNNING, 1:CLAIMED]");
    }
}
