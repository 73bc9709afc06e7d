use nom::{
    bytes::complete::tag,
    character::complete::{one_of, space0, space1, u64},
    IResult,
};
use thiserror::Error;

use crate::common::{AccessKind, Addr, ProcId};

/// A single access replayed by the simulator, in merged trace order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TraceEvent {
    pub proc: ProcId,
    pub kind: AccessKind,
    pub addr: Addr,
}

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("line {line}: malformed trace event `{content}`")]
    MalformedLine { line: usize, content: String },
    #[error("line {line}: processor P{id} out of range ({num_processors} processors configured)")]
    UnknownProcessor {
        line: usize,
        id: usize,
        num_processors: usize,
    },
}

pub type Result<T> = std::result::Result<T, TraceError>;

/// `P<id> <R|W> <address>`
fn event(input: &str) -> IResult<&str, TraceEvent> {
    let (input, _) = space0(input)?;
    let (input, _) = tag("P")(input)?;
    let (input, id) = u64(input)?;
    let (input, _) = space1(input)?;
    let (input, op) = one_of("RW")(input)?;
    let (input, _) = space1(input)?;
    let (input, addr) = u64(input)?;
    let (input, _) = space0(input)?;
    let kind = match op {
        'R' => AccessKind::Read,
        _ => AccessKind::Write,
    };
    Ok((
        input,
        TraceEvent {
            proc: ProcId::new(id as usize),
            kind,
            addr: Addr::new(addr as usize),
        },
    ))
}

/// Parse a whole trace. `#` starts a comment running to end of line; blank
/// lines are skipped. Any other unparseable line is fatal, as is an event
/// naming a processor outside the configured range.
pub fn parse_trace(input: &str, num_processors: usize) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    for (idx, raw) in input.lines().enumerate() {
        let line = idx + 1;
        let content = raw.split('#').next().unwrap_or(raw).trim();
        if content.is_empty() {
            continue;
        }
        let malformed = || TraceError::MalformedLine {
            line,
            content: content.to_string(),
        };
        let (rest, ev) = event(content).map_err(|_| malformed())?;
        if !rest.is_empty() {
            return Err(malformed());
        }
        if ev.proc.index() >= num_processors {
            return Err(TraceError::UnknownProcessor {
                line,
                id: ev.proc.index(),
                num_processors,
            });
        }
        events.push(ev);
    }
    Ok(events)
}
