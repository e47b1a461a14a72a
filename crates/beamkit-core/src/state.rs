//! State machines for the controller engine
//!
//! This module provides:
//! - The send-loop lifecycle state (`ControllerState`) with its transition table
//! - The transport lifecycle state (`ConnectionState`)
//! - The classified device status (`DeviceStatus`) shared by both protocol
//!   families, reduced to the three questions the send loop actually asks

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of one controller's send loop
///
/// Exactly one instance exists per controller. Created `Init`, moves to
/// `Active` when the send loop starts, oscillates between the operating
/// states during a job, and ends its life `Terminate` → `End` when the
/// send-loop thread exits. `End` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerState {
    /// Created, send loop not yet running
    Init,
    /// Send loop running and transmitting
    Active,
    /// Send loop running, both queues empty
    Idle,
    /// Normal-queue traffic held; realtime traffic still flows
    Paused,
    /// Hard hold: pause was requested while already paused
    Busy,
    /// Connection refused too many times; waiting for operator intervention
    Suspended,
    /// Flushing to completion: polling until the device reports idle
    Waiting,
    /// Shutdown requested; send loop exits at the next cycle boundary
    Terminate,
    /// Send-loop thread has exited
    End,
}

impl ControllerState {
    /// Check if a transition from this state to `target` is valid.
    ///
    /// Returns `true` for valid transitions according to the send-loop
    /// state machine:
    /// - Init only starts (Active) or terminates
    /// - the operating states (Active, Idle, Paused, Busy) move between
    ///   each other, enter Waiting for a flush, or Suspended on refusal
    ///   escalation
    /// - Busy releases to Paused, never directly to Active
    /// - Waiting restores to whichever operating state it interrupted
    /// - any live state can Terminate; only Terminate reaches End
    pub fn can_transition_to(&self, target: ControllerState) -> bool {
        use ControllerState::*;
        if *self == target {
            return true;
        }
        matches!(
            (self, target),
            (Init, Active | Terminate)
                | (Active, Idle | Paused | Waiting | Suspended | Terminate)
                | (Idle, Active | Paused | Waiting | Suspended | Terminate)
                | (Paused, Active | Busy | Waiting | Suspended | Terminate)
                | (Busy, Paused | Waiting | Suspended | Terminate)
                | (Waiting, Active | Idle | Paused | Busy | Terminate)
                | (Suspended, Active | Terminate)
                | (Terminate, End)
        )
    }

    /// Whether normal-queue traffic is held in this state.
    ///
    /// Realtime-queue frames are still sent while held; this is how resume
    /// and abort directives escape a paused controller.
    pub fn holds_normal_traffic(&self) -> bool {
        matches!(
            self,
            ControllerState::Paused | ControllerState::Busy | ControllerState::Suspended
        )
    }

    /// Whether the send loop is on its way out or already gone
    pub fn is_shutting_down(&self) -> bool {
        matches!(self, ControllerState::Terminate | ControllerState::End)
    }

    /// Whether this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ControllerState::End)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Active => write!(f, "Active"),
            Self::Idle => write!(f, "Idle"),
            Self::Paused => write!(f, "Paused"),
            Self::Busy => write!(f, "Busy"),
            Self::Suspended => write!(f, "Suspended"),
            Self::Waiting => write!(f, "Waiting"),
            Self::Terminate => write!(f, "Terminate"),
            Self::End => write!(f, "End"),
        }
    }
}

/// State of the transport underneath a controller
///
/// Tracks the connection lifecycle only; the send loop requests open and
/// close but never mutates transport state directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Never opened
    Unopened,
    /// Open attempt in progress
    Connecting,
    /// Open and usable
    Open,
    /// Closed after having been open
    Closed,
    /// Failed; must reconnect before use
    Errored,
}

impl ConnectionState {
    /// Check if a transition from this state to `target` is valid.
    ///
    /// Returns `true` for valid transitions:
    /// - Unopened → Connecting
    /// - Connecting → Open, Errored, Closed
    /// - Open → Closed, Errored
    /// - Closed → Connecting
    /// - Errored → Connecting, Closed
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        if *self == target {
            return true;
        }
        matches!(
            (self, target),
            (Unopened, Connecting)
                | (Connecting, Open | Errored | Closed)
                | (Open, Closed | Errored)
                | (Closed, Connecting)
                | (Errored, Connecting | Closed)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unopened => write!(f, "Unopened"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closed => write!(f, "Closed"),
            Self::Errored => write!(f, "Errored"),
        }
    }
}

/// Classified result of one status poll
///
/// Both protocol families decode their raw status replies into this one
/// closed set. The send loop only ever asks the three questions exposed by
/// the predicates below; everything else the raw bits carry is diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    /// Device accepted the last frame and can take the next
    Ok,
    /// On-board buffer full or list processor occupied; try again shortly
    Busy,
    /// Device rejected the last frame (checksum or protocol error)
    Error,
    /// Device has consumed everything and is idle
    Finished,
    /// Device confirmed its serial-number challenge (M3 boards)
    SerialConfirmed,
    /// Supply voltage sagged; informational only
    PowerLow,
    /// Unclassified raw status value
    Unknown(u8),
}

impl DeviceStatus {
    /// May the next frame be sent?
    pub fn accepts_next(&self) -> bool {
        matches!(
            self,
            DeviceStatus::Ok | DeviceStatus::Finished | DeviceStatus::SerialConfirmed
        )
    }

    /// Did the device reject the last frame?
    pub fn rejected_last(&self) -> bool {
        matches!(self, DeviceStatus::Error)
    }

    /// Is the device completely idle, with nothing left to execute?
    pub fn is_idle(&self) -> bool {
        matches!(self, DeviceStatus::Finished | DeviceStatus::SerialConfirmed)
    }

    /// An all-zero reply: the device did not answer at all.
    pub fn is_no_reply(&self) -> bool {
        matches!(self, DeviceStatus::Unknown(0))
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Busy => write!(f, "BUSY"),
            Self::Error => write!(f, "ERROR"),
            Self::Finished => write!(f, "FINISHED"),
            Self::SerialConfirmed => write!(f, "SERIAL CONFIRMED"),
            Self::PowerLow => write!(f, "POWER LOW"),
            Self::Unknown(raw) => write!(f, "UNKNOWN(0x{raw:02X})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CONTROLLER_STATES: [ControllerState; 9] = [
        ControllerState::Init,
        ControllerState::Active,
        ControllerState::Idle,
        ControllerState::Paused,
        ControllerState::Busy,
        ControllerState::Suspended,
        ControllerState::Waiting,
        ControllerState::Terminate,
        ControllerState::End,
    ];

    /// Reference edge list, written out independently of the match table.
    fn allowed_targets(from: ControllerState) -> Vec<ControllerState> {
        use ControllerState::*;
        match from {
            Init => vec![Active, Terminate],
            Active => vec![Idle, Paused, Waiting, Suspended, Terminate],
            Idle => vec![Active, Paused, Waiting, Suspended, Terminate],
            Paused => vec![Active, Busy, Waiting, Suspended, Terminate],
            Busy => vec![Paused, Waiting, Suspended, Terminate],
            Waiting => vec![Active, Idle, Paused, Busy, Terminate],
            Suspended => vec![Active, Terminate],
            Terminate => vec![End],
            End => vec![],
        }
    }

    #[test]
    fn controller_transition_table_exhaustive() {
        for from in ALL_CONTROLLER_STATES {
            let allowed = allowed_targets(from);
            for to in ALL_CONTROLLER_STATES {
                let expected = from == to || allowed.contains(&to);
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "transition {from} -> {to}"
                );
            }
        }
    }

    #[test]
    fn end_is_terminal() {
        for to in ALL_CONTROLLER_STATES {
            if to != ControllerState::End {
                assert!(!ControllerState::End.can_transition_to(to));
            }
        }
        assert!(ControllerState::End.is_terminal());
        assert!(ControllerState::End.is_shutting_down());
        assert!(ControllerState::Terminate.is_shutting_down());
    }

    #[test]
    fn busy_releases_to_paused_only() {
        assert!(ControllerState::Busy.can_transition_to(ControllerState::Paused));
        assert!(!ControllerState::Busy.can_transition_to(ControllerState::Active));
        assert!(!ControllerState::Busy.can_transition_to(ControllerState::Idle));
    }

    #[test]
    fn held_states_block_normal_traffic() {
        assert!(ControllerState::Paused.holds_normal_traffic());
        assert!(ControllerState::Busy.holds_normal_traffic());
        assert!(ControllerState::Suspended.holds_normal_traffic());
        assert!(!ControllerState::Active.holds_normal_traffic());
        assert!(!ControllerState::Idle.holds_normal_traffic());
        assert!(!ControllerState::Waiting.holds_normal_traffic());
    }

    #[test]
    fn connection_transitions() {
        use ConnectionState::*;
        assert!(Unopened.can_transition_to(Connecting));
        assert!(!Unopened.can_transition_to(Open));
        assert!(Connecting.can_transition_to(Open));
        assert!(Connecting.can_transition_to(Errored));
        assert!(Open.can_transition_to(Closed));
        assert!(Open.can_transition_to(Errored));
        assert!(!Open.can_transition_to(Connecting));
        assert!(Closed.can_transition_to(Connecting));
        assert!(Errored.can_transition_to(Connecting));
        assert!(!Closed.can_transition_to(Open));
    }

    #[test]
    fn device_status_predicates() {
        assert!(DeviceStatus::Ok.accepts_next());
        assert!(DeviceStatus::Finished.accepts_next());
        assert!(DeviceStatus::SerialConfirmed.accepts_next());
        assert!(!DeviceStatus::Busy.accepts_next());
        assert!(!DeviceStatus::Error.accepts_next());

        assert!(DeviceStatus::Error.rejected_last());
        assert!(!DeviceStatus::Busy.rejected_last());

        assert!(DeviceStatus::Finished.is_idle());
        assert!(DeviceStatus::SerialConfirmed.is_idle());
        assert!(!DeviceStatus::Ok.is_idle());

        assert!(DeviceStatus::Unknown(0).is_no_reply());
        assert!(!DeviceStatus::Unknown(0x42).is_no_reply());
        assert!(!DeviceStatus::Ok.is_no_reply());
    }

    #[test]
    fn device_status_display() {
        assert_eq!(DeviceStatus::Ok.to_string(), "OK");
        assert_eq!(DeviceStatus::Unknown(0xEF).to_string(), "UNKNOWN(0xEF)");
        assert_eq!(DeviceStatus::SerialConfirmed.to_string(), "SERIAL CONFIRMED");
    }
}
