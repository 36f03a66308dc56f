/*!
 * Smoke Test Plan
 *
 * A fixed sequence of commands with the replies a healthy server must give.
 * The default plan checks basic connectivity and a full set / get / exists /
 * delete cycle on key `a`.
 */

use crate::client::Client;
use crate::error::Result;
use crate::protocol::{Cmd, Reply};
use bytes::Bytes;
use log::{info, warn};
use std::fmt;

/// One command and the reply it must produce
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub cmd: Cmd,
    pub expected: Reply,
}

impl Step {
    pub fn new(cmd: Cmd, expected: Reply) -> Self {
        Self { cmd, expected }
    }
}

/// Renders the command as space-separated arguments, e.g. `SET a 1`
impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, arg) in self.cmd.args().iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", arg.escape_ascii())?;
        }
        Ok(())
    }
}

/// The five steps of the standard smoke run
pub fn default_plan() -> Vec<Step> {
    let a = Bytes::from_static(b"a");
    vec![
        Step::new(Cmd::Ping(None), Reply::Simple("PONG".into())),
        Step::new(
            Cmd::Set(a.clone(), Bytes::from_static(b"1")),
            Reply::Simple("OK".into()),
        ),
        Step::new(Cmd::Get(a.clone()), Reply::bulk("1")),
        Step::new(
            Cmd::Exists(vec![a.clone(), Bytes::from_static(b"b")]),
            Reply::Integer(1),
        ),
        Step::new(Cmd::Del(vec![a]), Reply::Integer(1)),
    ]
}

/// A step together with the reply the server actually gave
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub step: Step,
    pub reply: Reply,
    /// The reply exactly as received
    pub wire: Bytes,
}

impl Outcome {
    pub fn passed(&self) -> bool {
        self.reply == self.step.expected
    }
}

/// Outcomes of a smoke run, in plan order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
}

impl Report {
    /// True when every step got its expected reply
    pub fn passed(&self) -> bool {
        self.outcomes.iter().all(Outcome::passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.passed())
    }
}

/// Run `plan` against `client` in order
///
/// A reply mismatch is recorded and the run continues. Transport and
/// framing errors abort the run.
pub fn run(client: &mut Client, plan: &[Step]) -> Result<Report> {
    let mut report = Report::default();
    for step in plan {
        let reply = client.call(&step.cmd)?;
        let outcome = Outcome {
            step: step.clone(),
            reply,
            wire: Bytes::copy_from_slice(client.last_reply_bytes()),
        };
        if outcome.passed() {
            info!("ok   {}", step);
        } else {
            warn!(
                "FAIL {}: expected {:?}, got {:?}",
                step, step.expected, outcome.reply
            );
        }
        report.outcomes.push(outcome);
    }
    Ok(report)
}
