//! Hotkey chord policy.
//!
//! Platform key-event sources (an event tap, an evdev reader, ...) live
//! outside this crate. They report modifier state through a channel of
//! [`HotkeyEvent`]s; [`ChordPolicy`] turns those into mode requests:
//!
//! | Current      | Keys                          | Next        |
//! |--------------|-------------------------------|-------------|
//! | Idle         | Control+Command (newly down)  | Agent       |
//! | Idle         | Control+Option                | Intelligent |
//! | Idle         | Control                       | Dictation   |
//! | Dictation    | Control+Option                | Intelligent |
//! | Dictation    | Control released              | Idle        |
//! | Intelligent  | Control or Option released    | Idle        |
//! | Agent        | Control+Command (newly down)  | Idle        |
//!
//! Dictation and Intelligent are held; Agent is a toggle.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::ipc::types::Mode;
use crate::mode::{ModeController, Origin, SetOutcome};
use crate::status::HotkeyFlag;

/// Which modifier keys are held.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub control: bool,
    pub option: bool,
    pub command: bool,
}

impl ModifierState {
    pub const NONE: ModifierState = ModifierState {
        control: false,
        option: false,
        command: false,
    };

    pub fn control_only(self) -> bool {
        self.control && !self.option && !self.command
    }

    pub fn control_option(self) -> bool {
        self.control && self.option && !self.command
    }

    pub fn control_command(self) -> bool {
        self.control && self.command && !self.option
    }
}

/// Reported by the platform key-event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyEvent {
    ModifierChanged(ModifierState),
    /// Whether the global hotkey hook is (still) installed.
    Registered(bool),
    /// The OS disabled the hook; events may have been missed.
    TapDisabled,
}

/// Edge-detecting chord interpreter.
#[derive(Debug, Default)]
pub struct ChordPolicy {
    previous: ModifierState,
}

impl ChordPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mode that `keys` selects while `current` is active.
    pub fn next(&mut self, current: Mode, keys: ModifierState) -> Mode {
        let toggle =
            keys.control_command() && !(self.previous.control && self.previous.command);
        self.previous = keys;

        match current {
            Mode::Idle if toggle => Mode::Agent,
            Mode::Idle if keys.control_option() => Mode::Intelligent,
            Mode::Idle if keys.control_only() => Mode::Dictation,
            Mode::Idle => Mode::Idle,
            Mode::Dictation if keys.control_option() => Mode::Intelligent,
            Mode::Dictation if !keys.control => Mode::Idle,
            Mode::Dictation => Mode::Dictation,
            Mode::Intelligent if !keys.control || !keys.option => Mode::Idle,
            Mode::Intelligent => Mode::Intelligent,
            Mode::Agent if toggle => Mode::Idle,
            Mode::Agent => Mode::Agent,
        }
    }
}

/// Feed `keys` to `policy` against the live mode, in one step so no other
/// writer can change the mode between the decision and the write.
pub fn apply_chord(
    policy: &mut ChordPolicy,
    modes: &ModeController,
    keys: ModifierState,
) -> SetOutcome {
    modes.update(Origin::Hotkey, |current| policy.next(current, keys))
}

/// Apply hotkey events until the sending side is dropped.
pub async fn run(
    mut events: mpsc::Receiver<HotkeyEvent>,
    modes: Arc<ModeController>,
    registered: HotkeyFlag,
) {
    let mut policy = ChordPolicy::new();
    debug!("hotkey event loop started");

    while let Some(event) = events.recv().await {
        match event {
            HotkeyEvent::ModifierChanged(keys) => {
                apply_chord(&mut policy, &modes, keys);
            }
            HotkeyEvent::Registered(flag) => {
                info!(registered = flag, "hotkey registration changed");
                registered.set(flag);
            }
            HotkeyEvent::TapDisabled => {
                warn!("hotkey tap disabled, key events may be missed");
            }
        }
    }

    debug!("hotkey event loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTRL: ModifierState = ModifierState {
        control: true,
        option: false,
        command: false,
    };
    const CTRL_OPT: ModifierState = ModifierState {
        control: true,
        option: true,
        command: false,
    };
    const CTRL_CMD: ModifierState = ModifierState {
        control: true,
        option: false,
        command: true,
    };

    /// Feed `keys` in order starting from Idle, returning the final mode.
    fn press(sequence: &[ModifierState]) -> Mode {
        let mut policy = ChordPolicy::new();
        sequence
            .iter()
            .fold(Mode::Idle, |mode, keys| policy.next(mode, *keys))
    }

    #[test]
    fn test_modifier_predicates() {
        assert!(CTRL.control_only());
        assert!(!CTRL.control_option());
        assert!(CTRL_OPT.control_option());
        assert!(CTRL_CMD.control_command());
        assert!(!CTRL_CMD.control_only());
        assert!(!ModifierState::NONE.control_only());
    }

    #[test]
    fn test_idle_chords() {
        assert_eq!(press(&[CTRL]), Mode::Dictation);
        assert_eq!(press(&[CTRL_OPT]), Mode::Intelligent);
        assert_eq!(press(&[CTRL_CMD]), Mode::Agent);
        assert_eq!(press(&[ModifierState::NONE]), Mode::Idle);
    }

    #[test]
    fn test_dictation_upgrades_and_releases() {
        assert_eq!(press(&[CTRL, CTRL_OPT]), Mode::Intelligent);
        assert_eq!(press(&[CTRL, ModifierState::NONE]), Mode::Idle);
    }

    #[test]
    fn test_intelligent_releases_on_either_key() {
        assert_eq!(press(&[CTRL_OPT, CTRL]), Mode::Idle);
        let option_only = ModifierState {
            option: true,
            ..ModifierState::NONE
        };
        assert_eq!(press(&[CTRL_OPT, option_only]), Mode::Idle);
    }

    #[test]
    fn test_agent_is_sticky_until_toggled() {
        assert_eq!(
            press(&[CTRL_CMD, CTRL, CTRL_OPT, ModifierState::NONE]),
            Mode::Agent
        );
        assert_eq!(press(&[CTRL_CMD, ModifierState::NONE, CTRL_CMD]), Mode::Idle);
    }

    #[test]
    fn test_held_toggle_does_not_repeat() {
        // Holding Control+Command across two reports is one press, not two.
        assert_eq!(press(&[CTRL_CMD, CTRL_CMD]), Mode::Agent);
    }

    #[test]
    fn test_chord_uses_mode_set_by_another_writer() {
        let modes = ModeController::new();
        let mut policy = ChordPolicy::new();

        // A client switches to agent; the policy still last saw idle.
        modes.set(Mode::Agent, Origin::Internal);
        let outcome = apply_chord(&mut policy, &modes, CTRL);
        assert!(!outcome.changed());
        assert_eq!(modes.current(), Mode::Agent);

        // Only a fresh Control+Command press leaves agent.
        apply_chord(&mut policy, &modes, ModifierState::NONE);
        let outcome = apply_chord(&mut policy, &modes, CTRL_CMD);
        assert_eq!((outcome.previous, outcome.current), (Mode::Agent, Mode::Idle));
    }

    #[tokio::test]
    async fn test_event_loop_drives_controller() {
        let modes = Arc::new(ModeController::new());
        let flag = HotkeyFlag::new();
        let mut transitions = modes.subscribe();
        let (tx, rx) = mpsc::channel(8);

        let task = tokio::spawn(run(rx, Arc::clone(&modes), flag.clone()));
        tx.send(HotkeyEvent::Registered(true)).await.unwrap();
        tx.send(HotkeyEvent::ModifierChanged(CTRL)).await.unwrap();
        tx.send(HotkeyEvent::TapDisabled).await.unwrap();
        tx.send(HotkeyEvent::ModifierChanged(ModifierState::NONE))
            .await
            .unwrap();
        drop(tx);
        task.await.unwrap();

        assert!(flag.get());
        let first = transitions.recv().await.unwrap();
        assert_eq!(
            (first.from, first.to, first.origin),
            (Mode::Idle, Mode::Dictation, Origin::Hotkey)
        );
        let second = transitions.recv().await.unwrap();
        assert_eq!(second.to, Mode::Idle);
        assert_eq!(modes.current(), Mode::Idle);
    }
}
