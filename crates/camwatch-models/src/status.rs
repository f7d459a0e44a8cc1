//! Closed status sets for segments and detections.
//!
//! Every status column in the store maps onto one of these enums. Transition
//! rules are spelled out as exhaustive matches so adding a variant forces
//! every rule to be revisited.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Returned when a persisted status string is not part of the closed set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} status: {value}")]
pub struct StatusParseError {
    pub kind: &'static str,
    pub value: String,
}

impl StatusParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

/// Outcome of one recording attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStatus {
    /// Segment row exists, capture has not reported yet
    #[default]
    InProgress,
    /// Capture finished and the output file exists
    Success,
    /// Capture process failed or an unexpected error occurred
    Failed,
    /// Hard or soft capture deadline was exceeded
    Timeout,
}

impl RecordingStatus {
    pub const ALL: [RecordingStatus; 4] = [
        RecordingStatus::InProgress,
        RecordingStatus::Success,
        RecordingStatus::Failed,
        RecordingStatus::Timeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingStatus::InProgress => "in_progress",
            RecordingStatus::Success => "success",
            RecordingStatus::Failed => "failed",
            RecordingStatus::Timeout => "timeout",
        }
    }

    /// Terminal statuses set the segment's end time and are never left.
    pub fn is_terminal(&self) -> bool {
        match self {
            RecordingStatus::InProgress => false,
            RecordingStatus::Success | RecordingStatus::Failed | RecordingStatus::Timeout => true,
        }
    }

    pub fn can_transition_to(self, next: RecordingStatus) -> bool {
        use RecordingStatus::*;
        match (self, next) {
            (InProgress, Success | Failed | Timeout) => true,
            (InProgress, InProgress) => false,
            (Success | Failed | Timeout, _) => false,
        }
    }
}

impl fmt::Display for RecordingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecordingStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(RecordingStatus::InProgress),
            "success" => Ok(RecordingStatus::Success),
            "failed" => Ok(RecordingStatus::Failed),
            "timeout" => Ok(RecordingStatus::Timeout),
            other => Err(StatusParseError::new("recording", other)),
        }
    }
}

/// Person-detection progress of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub const ALL: [AnalysisStatus; 4] = [
        AnalysisStatus::Pending,
        AnalysisStatus::Processing,
        AnalysisStatus::Completed,
        AnalysisStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "pending",
            AnalysisStatus::Processing => "processing",
            AnalysisStatus::Completed => "completed",
            AnalysisStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AnalysisStatus::Completed | AnalysisStatus::Failed)
    }

    /// Allowed analysis transitions.
    ///
    /// `Processing -> Processing` covers a redelivered job picking up a run
    /// that crashed mid-way. `Completed -> Processing` is a forced re-run.
    /// Any status may be reset to `Pending` by an explicit reanalysis request.
    pub fn can_transition_to(self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        match (self, next) {
            (Pending, Processing | Failed) => true,
            (Pending, Pending | Completed) => false,
            (Processing, Pending | Processing | Completed | Failed) => true,
            (Completed, Pending | Processing) => true,
            (Completed, Completed | Failed) => false,
            (Failed, Pending | Processing | Failed) => true,
            (Failed, Completed) => false,
        }
    }

    /// Statuses from which `next` may be entered.
    pub fn predecessors_of(next: AnalysisStatus) -> Vec<AnalysisStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AnalysisStatus::Pending),
            "processing" => Ok(AnalysisStatus::Processing),
            "completed" => Ok(AnalysisStatus::Completed),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(StatusParseError::new("analysis", other)),
        }
    }
}

/// Captioning progress of a single detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CaptionStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl CaptionStatus {
    pub const ALL: [CaptionStatus; 4] = [
        CaptionStatus::Pending,
        CaptionStatus::Processing,
        CaptionStatus::Completed,
        CaptionStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CaptionStatus::Pending => "pending",
            CaptionStatus::Processing => "processing",
            CaptionStatus::Completed => "completed",
            CaptionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaptionStatus::Completed | CaptionStatus::Failed)
    }

    /// Allowed caption transitions.
    ///
    /// Captions are written once. Only an operator requeue moves a record
    /// back to `Pending` (from `Failed`, or from a stuck `Processing`).
    pub fn can_transition_to(self, next: CaptionStatus) -> bool {
        use CaptionStatus::*;
        match (self, next) {
            (Pending, Processing | Failed) => true,
            (Pending, Pending | Completed) => false,
            (Processing, Pending | Completed | Failed) => true,
            (Processing, Processing) => false,
            (Completed, Pending | Processing | Completed | Failed) => false,
            (Failed, Pending) => true,
            (Failed, Processing | Completed | Failed) => false,
        }
    }

    pub fn predecessors_of(next: CaptionStatus) -> Vec<CaptionStatus> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }
}

impl fmt::Display for CaptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptionStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CaptionStatus::Pending),
            "processing" => Ok(CaptionStatus::Processing),
            "completed" => Ok(CaptionStatus::Completed),
            "failed" => Ok(CaptionStatus::Failed),
            other => Err(StatusParseError::new("caption", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_terminal_states_are_final() {
        for from in RecordingStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in RecordingStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
        assert!(RecordingStatus::InProgress.can_transition_to(RecordingStatus::Timeout));
    }

    #[test]
    fn analysis_cannot_complete_without_processing() {
        assert!(!AnalysisStatus::Pending.can_transition_to(AnalysisStatus::Completed));
        assert!(!AnalysisStatus::Failed.can_transition_to(AnalysisStatus::Completed));
        assert_eq!(
            AnalysisStatus::predecessors_of(AnalysisStatus::Completed),
            vec![AnalysisStatus::Processing]
        );
    }

    #[test]
    fn caption_completed_is_write_once() {
        for to in CaptionStatus::ALL {
            assert!(!CaptionStatus::Completed.can_transition_to(to));
        }
        assert_eq!(
            CaptionStatus::predecessors_of(CaptionStatus::Processing),
            vec![CaptionStatus::Pending]
        );
    }

    #[test]
    fn status_strings_round_trip() {
        for s in RecordingStatus::ALL {
            assert_eq!(s.as_str().parse::<RecordingStatus>().unwrap(), s);
        }
        for s in AnalysisStatus::ALL {
            assert_eq!(s.as_str().parse::<AnalysisStatus>().unwrap(), s);
        }
        for s in CaptionStatus::ALL {
            assert_eq!(s.as_str().parse::<CaptionStatus>().unwrap(), s);
        }
        assert!("done".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&RecordingStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }
}
