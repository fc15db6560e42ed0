use std::{cell::RefCell, fmt, future::Future, rc::Rc};

use crate::{Error, Result};

/// Status line a device console prints when a command succeeds.
pub const OK: &str = "OK";

/// A line-based command interface to a simulated device.
///
/// Commands are plain strings (`"sms send 5559997777 hello"`), answers are
/// the lines the console printed. Implementations are free to trigger side
/// effects on simulated peers, like an incoming SMS or a dropped call.
pub trait DeviceConsole {
    fn run(&self, command: &str) -> impl Future<Output = Result<Vec<String>>>;
}

/// Run `command` and require the console to answer `OK` on its first line.
///
/// # Errors
///
/// Returns [`Error::Assertion`] carrying the console output otherwise.
pub async fn expect_ok<D>(console: &D, command: &str) -> Result<Vec<String>>
where
    D: DeviceConsole + ?Sized,
{
    let lines = console.run(command).await?;
    if lines.first().map(String::as_str) == Some(OK) {
        return Ok(lines);
    }
    Err(Error::Assertion(format!(
        "console command '{command}' answered {lines:?}, expected {OK}"
    )))
}

type Rule = Rc<RefCell<dyn FnMut(&str) -> Result<Vec<String>>>>;

/// A console answering from registered command prefixes.
///
/// The longest registered prefix wins. The rule receives the rest of the
/// command line with surrounding whitespace trimmed. Unknown commands answer
/// `KO: unknown command`. Clones share rules and history.
///
/// Rules may use the console they are registered on (read the history,
/// register more rules). A rule that ends up running itself again answers
/// `KO: command busy`.
///
/// ```
/// use parley::{DeviceConsole, ScriptedConsole};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
///
/// let console = ScriptedConsole::new();
/// console.on("gsm list", |_| Ok(vec!["OK".to_string()]));
///
/// assert_eq!(console.run("gsm list").await.unwrap(), ["OK"]);
/// assert_eq!(console.history(), ["gsm list"]);
/// # }
/// ```
#[derive(Clone, Default)]
pub struct ScriptedConsole {
    inner: Rc<RefCell<ConsoleState>>,
}

#[derive(Default)]
struct ConsoleState {
    rules: Vec<(String, Rule)>,
    history: Vec<String>,
}

impl ScriptedConsole {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the rule for commands starting with `prefix`.
    pub fn on<F>(&self, prefix: impl Into<String>, rule: F)
    where
        F: FnMut(&str) -> Result<Vec<String>> + 'static,
    {
        let prefix = prefix.into();
        let rule: Rule = Rc::new(RefCell::new(rule));
        let mut state = self.inner.borrow_mut();
        state.rules.retain(|(p, _)| *p != prefix);
        state.rules.push((prefix, rule));
    }

    /// Every command run so far, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.inner.borrow().history.clone()
    }

    fn answer(&self, command: &str) -> Result<Vec<String>> {
        let best = {
            let mut state = self.inner.borrow_mut();
            state.history.push(command.to_string());
            let best = state
                .rules
                .iter()
                .filter(|(prefix, _)| matches_prefix(command, prefix))
                .max_by_key(|(prefix, _)| prefix.len())
                .map(|(prefix, rule)| (prefix.len(), rule.clone()));
            best
        };
        let Some((len, shared)) = best else {
            tracing::debug!(%command, "console: unknown command");
            return Ok(vec!["KO: unknown command".to_string()]);
        };
        let Ok(mut rule) = shared.try_borrow_mut() else {
            tracing::warn!(%command, "console: rule re-entered");
            return Ok(vec!["KO: command busy".to_string()]);
        };
        (&mut *rule)(command[len..].trim())
    }
}

fn matches_prefix(command: &str, prefix: &str) -> bool {
    command.strip_prefix(prefix).is_some_and(|rest| {
        rest.is_empty() || rest.starts_with(char::is_whitespace)
    })
}

impl DeviceConsole for ScriptedConsole {
    async fn run(&self, command: &str) -> Result<Vec<String>> {
        let lines = self.answer(command.trim())?;
        tracing::trace!(%command, ?lines, "console");
        Ok(lines)
    }
}

impl fmt::Debug for ScriptedConsole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.borrow();
        let prefixes: Vec<&str> = state.rules.iter().map(|(p, _)| p.as_str()).collect();
        f.debug_struct("ScriptedConsole")
            .field("rules", &prefixes)
            .field("history", &state.history.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn ok() -> Result<Vec<String>> {
        Ok(vec![OK.to_string()])
    }

    #[tokio::test]
    async fn longest_prefix_wins() {
        let console = ScriptedConsole::new();
        console.on("gsm", |_| Ok(vec!["gsm".into(), OK.into()]));
        console.on("gsm list", |_| Ok(vec!["no calls".into(), OK.into()]));

        assert_eq!(console.run("gsm list").await.unwrap()[0], "no calls");
        assert_eq!(console.run("gsm status").await.unwrap()[0], "gsm");
    }

    #[tokio::test]
    async fn prefix_must_end_at_a_word_boundary() {
        let console = ScriptedConsole::new();
        console.on("sms", |_| ok());
        let lines = console.run("smsx send").await.unwrap();
        assert_eq!(lines, ["KO: unknown command"]);
    }

    #[tokio::test]
    async fn rule_sees_arguments() {
        let console = ScriptedConsole::new();
        let seen = Rc::new(RefCell::new(String::new()));
        let captured = seen.clone();
        console.on("sms send", move |args| {
            *captured.borrow_mut() = args.to_string();
            ok()
        });

        console.run("sms send 5559997777 Hello there").await.unwrap();
        assert_eq!(*seen.borrow(), "5559997777 Hello there");
    }

    #[tokio::test]
    async fn replacing_a_rule() {
        let console = ScriptedConsole::new();
        let calls = Rc::new(Cell::new(0));
        let first = calls.clone();
        console.on("gsm list", move |_| {
            first.set(first.get() + 1);
            ok()
        });
        console.on("gsm list", |_| Ok(vec!["KO".into()]));

        assert_eq!(console.run("gsm list").await.unwrap(), ["KO"]);
        assert_eq!(calls.get(), 0);
    }

    #[tokio::test]
    async fn expect_ok_checks_first_line() {
        let console = ScriptedConsole::new();
        console.on("sms send", |_| ok());
        console.on("gsm call", |_| Ok(vec!["KO: bad number".into()]));

        assert!(expect_ok(&console, "sms send 1 hi").await.is_ok());
        let err = expect_ok(&console, "gsm call 12345").await.unwrap_err();
        assert!(matches!(err, Error::Assertion(_)));
        assert_eq!(console.history(), ["sms send 1 hi", "gsm call 12345"]);
    }

    #[tokio::test]
    async fn rules_can_use_their_console() {
        let console = ScriptedConsole::new();
        let inner = console.clone();
        console.on("modem reset", move |_| {
            assert_eq!(inner.history(), ["modem reset"]);
            inner.on("modem status", |_| Ok(vec!["ready".into(), OK.into()]));
            ok()
        });

        console.run("modem reset").await.unwrap();
        assert_eq!(console.run("modem status").await.unwrap()[0], "ready");
    }

    #[tokio::test]
    async fn reentered_rule_answers_busy() {
        let console = ScriptedConsole::new();
        let inner = console.clone();
        let nested = Rc::new(RefCell::new(Vec::new()));
        let seen = nested.clone();
        console.on("gsm call", move |args| {
            if args != "again" {
                seen.borrow_mut().extend(inner.answer("gsm call again").unwrap());
            }
            ok()
        });

        assert_eq!(console.run("gsm call 5551234").await.unwrap(), [OK]);
        assert_eq!(*nested.borrow(), ["KO: command busy"]);
        assert_eq!(console.history(), ["gsm call 5551234", "gsm call again"]);
    }
}
