//! Human readable rendering of query outcomes.

use std::io::{self, Write};

use tracing::error;

use crate::query::QueryOutcome;

/// Writes query outcomes to a sink, stdout by default.
///
/// Write failures are logged and never propagated.
#[derive(Debug)]
pub struct Reporter<W> {
    out: W,
}

impl Reporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn report(&mut self, outcome: &QueryOutcome) {
        if let Err(error) = self.write_outcome(outcome) {
            error!(%error, "Failed to report query outcome");
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_outcome(&mut self, outcome: &QueryOutcome) -> io::Result<()> {
        match outcome {
            QueryOutcome::Lookup(result) => {
                if result.records.is_empty() {
                    writeln!(self.out, "found: []")?;
                } else {
                    writeln!(self.out, "found: [")?;
                    for record in &result.records {
                        writeln!(self.out, "  {record}")?;
                    }
                    writeln!(self.out, "]")?;
                }

                if result.timed_out {
                    writeln!(self.out, "timed_out: true")?;
                }
            }
            QueryOutcome::Direct { from, response } => {
                writeln!(self.out, "response from {from}")?;
                writeln!(self.out, "  {response}")?;
            }
        }

        self.out.flush()
    }
}
