use std::future::Future;
use std::io::BufRead;

use anyhow::Result;
use tracing::debug;

/// What to do after one pass of an interactive tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    /// Keep going with the same inputs.
    Continue,
    /// Start over, e.g. asking for a new target.
    Restart,
    Exit,
}

impl SessionControl {
    /// Map a menu answer to a control value; unknown answers exit.
    pub fn from_answer(answer: &str) -> Self {
        match answer.trim().to_ascii_lowercase().as_str() {
            "" | "c" | "continue" | "again" => SessionControl::Continue,
            "r" | "restart" | "new" => SessionControl::Restart,
            _ => SessionControl::Exit,
        }
    }
}

/// Drive `step` in a loop until it returns [`SessionControl::Exit`] or an error.
///
/// `step` receives the pass number and whether this pass follows a restart. Returns the
/// number of passes run.
pub fn drive<F>(mut step: F) -> Result<u64>
where
    F: FnMut(u64, bool) -> Result<SessionControl>,
{
    let mut pass = 0u64;
    let mut restarted = true;
    loop {
        pass += 1;
        let next = step(pass, restarted)?;
        debug!(pass, ?next, "session step");
        match next {
            SessionControl::Continue => restarted = false,
            SessionControl::Restart => restarted = true,
            SessionControl::Exit => return Ok(pass),
        }
    }
}

/// Wait for an answer from `read`, or give up with `None` when `interrupt` fires first.
///
/// Lets an interrupt end the session while it is blocked on input, not only mid-run.
pub async fn prompt_line<R, I>(read: R, interrupt: I) -> Result<Option<String>>
where
    R: Future<Output = Result<Option<String>>>,
    I: Future<Output = ()>,
{
    tokio::select! {
        line = read => line,
        _ = interrupt => {
            debug!("prompt interrupted");
            Ok(None)
        }
    }
}

/// One line from stdin on a blocking thread; `None` at end of input.
pub async fn stdin_line() -> Result<Option<String>> {
    tokio::task::spawn_blocking(|| -> Result<Option<String>> {
        let mut line = String::new();
        match std::io::stdin().lock().read_line(&mut line)? {
            0 => Ok(None),
            _ => Ok(Some(line)),
        }
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_map_to_controls() {
        assert_eq!(SessionControl::from_answer(""), SessionControl::Continue);
        assert_eq!(SessionControl::from_answer(" R "), SessionControl::Restart);
        assert_eq!(SessionControl::from_answer("q"), SessionControl::Exit);
    }

    #[test]
    fn drives_without_recursion() {
        let script = [
            SessionControl::Continue,
            SessionControl::Restart,
            SessionControl::Continue,
            SessionControl::Exit,
        ];
        let mut restarts = Vec::new();
        let passes = drive(|pass, restarted| {
            restarts.push(restarted);
            Ok(script[(pass - 1) as usize])
        })
        .unwrap();
        assert_eq!(passes, 4);
        assert_eq!(restarts, vec![true, false, true, false]);
    }

    #[test]
    fn many_restarts_do_not_grow_the_stack() {
        let passes = drive(|pass, _| {
            Ok(if pass < 100_000 {
                SessionControl::Restart
            } else {
                SessionControl::Exit
            })
        })
        .unwrap();
        assert_eq!(passes, 100_000);
    }

    #[test]
    fn step_errors_propagate() {
        let res = drive(|_, _| anyhow::bail!("input closed"));
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn interrupt_ends_a_pending_prompt() {
        let answer = prompt_line(std::future::pending(), async {}).await.unwrap();
        assert_eq!(answer, None);
    }

    #[tokio::test]
    async fn answer_wins_when_no_interrupt_arrives() {
        let answer = prompt_line(async { Ok(Some("r\n".to_string())) }, std::future::pending())
            .await
            .unwrap();
        assert_eq!(answer.as_deref(), Some("r\n"));
    }
}
