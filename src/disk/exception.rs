//! Recoverable-condition reporting.
//!
//! Operations that can ask "ignore or cancel?" take an `&dyn ExceptionHandler`
//! and call [`throw`]. Exploratory code (label probing, filesystem probing,
//! the coarse pass of a bad-sector scan) passes [`Quiet`], under which every
//! exception stays unhandled and is turned into an error by the caller.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Answers a handler may pick for one exception.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ExceptionOptions: u8 {
        const FIX = 1 << 0;
        const YES = 1 << 1;
        const NO = 1 << 2;
        const OK = 1 << 3;
        const RETRY = 1 << 4;
        const IGNORE = 1 << 5;
        const CANCEL = 1 << 6;
    }
}

impl ExceptionOptions {
    pub const OK_CANCEL: Self = Self::OK.union(Self::CANCEL);
    pub const IGNORE_CANCEL: Self = Self::IGNORE.union(Self::CANCEL);
    pub const RETRY_IGNORE_CANCEL: Self = Self::RETRY.union(Self::IGNORE_CANCEL);

    pub fn allows(&self, choice: Choice) -> bool {
        choice.as_option().is_some_and(|opt| self.contains(opt))
    }

    /// The individual answers in a stable order.
    pub fn choices(&self) -> Vec<Choice> {
        Choice::ALL
            .iter()
            .copied()
            .filter(|c| self.allows(*c))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    Information,
    Warning,
    Error,
    Fatal,
    Bug,
    NoFeature,
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ExceptionType::Information => "Information",
            ExceptionType::Warning => "Warning",
            ExceptionType::Error => "Error",
            ExceptionType::Fatal => "Fatal",
            ExceptionType::Bug => "Bug",
            ExceptionType::NoFeature => "No Implementation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Unhandled,
    Fix,
    Yes,
    No,
    Ok,
    Retry,
    Ignore,
    Cancel,
}

impl Choice {
    pub const ALL: [Choice; 7] = [
        Choice::Fix,
        Choice::Yes,
        Choice::No,
        Choice::Ok,
        Choice::Retry,
        Choice::Ignore,
        Choice::Cancel,
    ];

    fn as_option(&self) -> Option<ExceptionOptions> {
        match self {
            Choice::Unhandled => None,
            Choice::Fix => Some(ExceptionOptions::FIX),
            Choice::Yes => Some(ExceptionOptions::YES),
            Choice::No => Some(ExceptionOptions::NO),
            Choice::Ok => Some(ExceptionOptions::OK),
            Choice::Retry => Some(ExceptionOptions::RETRY),
            Choice::Ignore => Some(ExceptionOptions::IGNORE),
            Choice::Cancel => Some(ExceptionOptions::CANCEL),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Choice::Unhandled => "unhandled",
            Choice::Fix => "fix",
            Choice::Yes => "yes",
            Choice::No => "no",
            Choice::Ok => "ok",
            Choice::Retry => "retry",
            Choice::Ignore => "ignore",
            Choice::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Exception {
    pub kind: ExceptionType,
    pub options: ExceptionOptions,
    pub message: String,
}

pub trait ExceptionHandler {
    fn handle(&self, exception: &Exception) -> Choice;
}

/// Leaves every exception unhandled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Quiet;

impl ExceptionHandler for Quiet {
    fn handle(&self, _exception: &Exception) -> Choice {
        Choice::Unhandled
    }
}

/// Answers every exception with the same choice when it is offered.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub Choice);

impl ExceptionHandler for FixedPolicy {
    fn handle(&self, exception: &Exception) -> Choice {
        if exception.options.allows(self.0) {
            self.0
        } else {
            Choice::Unhandled
        }
    }
}

impl<F> ExceptionHandler for F
where
    F: Fn(&Exception) -> Choice,
{
    fn handle(&self, exception: &Exception) -> Choice {
        self(exception)
    }
}

/// Reports an exception and returns the handler's answer. Answers outside
/// `options` come back as [`Choice::Unhandled`].
pub fn throw(
    handler: &dyn ExceptionHandler,
    kind: ExceptionType,
    options: ExceptionOptions,
    message: impl Into<String>,
) -> Choice {
    let exception = Exception {
        kind,
        options,
        message: message.into(),
    };
    match kind {
        ExceptionType::Information => debug!("{}: {}", kind, exception.message),
        ExceptionType::Warning => warn!("{}: {}", kind, exception.message),
        _ => error!("{}: {}", kind, exception.message),
    }

    let choice = handler.handle(&exception);
    if choice != Choice::Unhandled && !options.allows(choice) {
        warn!("handler answered {} which was not offered", choice.name());
        return Choice::Unhandled;
    }
    choice
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_leaves_unhandled() {
        let choice = throw(
            &Quiet,
            ExceptionType::Error,
            ExceptionOptions::IGNORE_CANCEL,
            "probe failed",
        );
        assert_eq!(choice, Choice::Unhandled);
    }

    #[test]
    fn test_fixed_policy_respects_options() {
        let policy = FixedPolicy(Choice::Ignore);
        let choice = throw(
            &policy,
            ExceptionType::Warning,
            ExceptionOptions::IGNORE_CANCEL,
            "size mismatch",
        );
        assert_eq!(choice, Choice::Ignore);

        let choice = throw(&policy, ExceptionType::Error, ExceptionOptions::OK_CANCEL, "x");
        assert_eq!(choice, Choice::Unhandled);
    }

    #[test]
    fn test_closure_handler_cannot_pick_unoffered() {
        let handler = |_: &Exception| Choice::Retry;
        let choice = throw(
            &handler,
            ExceptionType::Error,
            ExceptionOptions::IGNORE_CANCEL,
            "x",
        );
        assert_eq!(choice, Choice::Unhandled);
        assert_eq!(
            ExceptionOptions::RETRY_IGNORE_CANCEL.choices(),
            vec![Choice::Retry, Choice::Ignore, Choice::Cancel]
        );
    }
}
