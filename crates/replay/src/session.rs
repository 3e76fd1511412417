//! Executes trace commands against an allocator.

use std::{collections::BTreeMap, fmt, str::FromStr};

use bufalloc::{
    BufferAllocator, InitError, LinearAllocator, PoolAllocator, StackAllocator,
    free_list::{ALLOC_HEADER_SIZE, FitPolicy, FreeListAllocator, IntrusiveFreeListAllocator},
};
use snafu::{OptionExt as _, ResultExt as _, Snafu, ensure};
use snafu_utils::Location;

use crate::{
    render::{Segment, SegmentState},
    trace::{Command, Handle, Line},
};

/// The allocator a session drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocatorKind {
    Linear,
    Stack,
    Pool,
    FreeList,
    Intrusive,
}

impl AllocatorKind {
    fn name(self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Stack => "stack",
            Self::Pool => "pool",
            Self::FreeList => "free-list",
            Self::Intrusive => "intrusive",
        }
    }
}

impl fmt::Display for AllocatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for AllocatorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s {
            "linear" => Self::Linear,
            "stack" => Self::Stack,
            "pool" => Self::Pool,
            "free-list" => Self::FreeList,
            "intrusive" => Self::Intrusive,
            _ => {
                return Err(format!(
                    "unknown allocator `{s}`, expected one of linear, stack, pool, free-list, intrusive"
                ));
            }
        };
        Ok(kind)
    }
}

/// Parameters used to (re)initialize the allocator.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub kind: AllocatorKind,
    pub buffer_size: usize,
    pub chunk_size: usize,
    pub policy: FitPolicy,
}

#[derive(Debug)]
enum Target {
    Linear(LinearAllocator),
    Stack(StackAllocator),
    Pool(PoolAllocator),
    FreeList(FreeListAllocator),
    Intrusive(IntrusiveFreeListAllocator),
}

impl Target {
    fn as_dyn(&self) -> &dyn BufferAllocator {
        match self {
            Self::Linear(a) => a,
            Self::Stack(a) => a,
            Self::Pool(a) => a,
            Self::FreeList(a) => a,
            Self::Intrusive(a) => a,
        }
    }

    fn as_dyn_mut(&mut self) -> &mut dyn BufferAllocator {
        match self {
            Self::Linear(a) => a,
            Self::Stack(a) => a,
            Self::Pool(a) => a,
            Self::FreeList(a) => a,
            Self::Intrusive(a) => a,
        }
    }
}

#[derive(Debug, Snafu)]
#[snafu(module)]
pub enum SessionError {
    #[snafu(display("failed to initialize {kind} allocator: {source}"))]
    Init {
        kind: AllocatorKind,
        #[snafu(source)]
        source: InitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: {kind} allocator does not take {what}"))]
    Unsupported {
        line: usize,
        kind: AllocatorKind,
        what: &'static str,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: {kind} allocator needs a handle to free"))]
    MissingHandle {
        line: usize,
        kind: AllocatorKind,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("line {line}: {handle} is not a live allocation"))]
    UnknownHandle {
        line: usize,
        handle: Handle,
        #[snafu(implicit)]
        location: Location,
    },
}

/// What a command did, for printing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Allocated { handle: Handle, offset: usize },
    Exhausted,
    Freed(Vec<Handle>),
    Cleared,
    Reset,
    PolicySet(FitPolicy),
    Dump,
}

/// An allocator plus the handles of its live allocations.
#[derive(Debug)]
pub struct Session {
    config: Config,
    target: Target,
    live: BTreeMap<Handle, *mut u8>,
    next_handle: usize,
}

impl Session {
    pub fn new(config: Config) -> Result<Self, SessionError> {
        let kind = config.kind;
        let target = match kind {
            AllocatorKind::Linear => {
                let mut a = LinearAllocator::new();
                a.init(config.buffer_size).map(|()| Target::Linear(a))
            }
            AllocatorKind::Stack => {
                let mut a = StackAllocator::new();
                a.init(config.buffer_size).map(|()| Target::Stack(a))
            }
            AllocatorKind::Pool => {
                let mut a = PoolAllocator::new();
                a.init(config.buffer_size, config.chunk_size)
                    .map(|()| Target::Pool(a))
            }
            AllocatorKind::FreeList => {
                let mut a = FreeListAllocator::new(config.policy);
                a.init(config.buffer_size).map(|()| Target::FreeList(a))
            }
            AllocatorKind::Intrusive => {
                let mut a = IntrusiveFreeListAllocator::new(config.policy);
                a.init(config.buffer_size).map(|()| Target::Intrusive(a))
            }
        }
        .context(session_error::InitSnafu { kind })?;

        Ok(Self {
            config,
            target,
            live: BTreeMap::new(),
            next_handle: 0,
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Runs one trace command.
    pub fn apply(&mut self, line: &Line) -> Result<Outcome, SessionError> {
        let kind = self.config.kind;
        let number = line.number;
        let outcome = match line.command {
            Command::Alloc { size, align } => {
                let ptr = match &mut self.target {
                    Target::Linear(a) => a.allocate(size, align.unwrap_or(0)),
                    Target::Stack(a) => a.allocate(size, align.unwrap_or(0)),
                    Target::Pool(a) => {
                        ensure!(
                            align.is_none(),
                            session_error::UnsupportedSnafu {
                                line: number,
                                kind,
                                what: "an alignment",
                            }
                        );
                        if size > a.chunk_size() {
                            None
                        } else {
                            a.allocate()
                        }
                    }
                    Target::FreeList(_) | Target::Intrusive(_) if align.is_some() => {
                        return session_error::UnsupportedSnafu {
                            line: number,
                            kind,
                            what: "an alignment",
                        }
                        .fail();
                    }
                    Target::FreeList(a) => a.allocate(size),
                    Target::Intrusive(a) => a.allocate(size),
                };
                match ptr {
                    Some(ptr) => {
                        let handle = Handle(self.next_handle);
                        self.next_handle += 1;
                        self.live.insert(handle, ptr);
                        let offset = self.target.as_dyn().offset_of(ptr).unwrap_or_default();
                        Outcome::Allocated { handle, offset }
                    }
                    None => Outcome::Exhausted,
                }
            }
            Command::Free(handle) => self.free(number, handle)?,
            Command::Clear => {
                self.target.as_dyn_mut().clear();
                self.live.clear();
                Outcome::Cleared
            }
            Command::Reset => {
                self.target.as_dyn_mut().reset();
                self.live.clear();
                Outcome::Reset
            }
            Command::Policy(policy) => {
                match &mut self.target {
                    Target::FreeList(a) => a.set_policy(policy),
                    Target::Intrusive(a) => a.set_policy(policy),
                    _ => {
                        return session_error::UnsupportedSnafu {
                            line: number,
                            kind,
                            what: "a fit policy",
                        }
                        .fail();
                    }
                }
                Outcome::PolicySet(policy)
            }
            Command::Dump => Outcome::Dump,
        };
        tracing::debug!(line = number, command = %line.command, ?outcome, "applied");
        Ok(outcome)
    }

    fn free(&mut self, line: usize, handle: Option<Handle>) -> Result<Outcome, SessionError> {
        let kind = self.config.kind;
        match (&mut self.target, handle) {
            (Target::Linear(a), None) => {
                a.free();
                let freed = self.live.keys().copied().collect();
                self.live.clear();
                Ok(Outcome::Freed(freed))
            }
            (Target::Stack(a), None) => {
                a.free();
                let freed = self.live.pop_last().map(|(handle, _)| handle);
                Ok(Outcome::Freed(freed.into_iter().collect()))
            }
            (Target::Linear(_) | Target::Stack(_), Some(_)) => session_error::UnsupportedSnafu {
                line,
                kind,
                what: "a handle to free",
            }
            .fail(),
            (_, None) => session_error::MissingHandleSnafu { line, kind }.fail(),
            (target, Some(handle)) => {
                let ptr = self
                    .live
                    .remove(&handle)
                    .context(session_error::UnknownHandleSnafu { line, handle })?;
                match target {
                    Target::Pool(a) => a.free(ptr),
                    Target::FreeList(a) => a.free(ptr),
                    Target::Intrusive(a) => a.free(ptr),
                    Target::Linear(_) | Target::Stack(_) => {}
                }
                Ok(Outcome::Freed(vec![handle]))
            }
        }
    }

    /// Describes the buffer as a sequence of free and used segments.
    #[must_use]
    pub fn segments(&self) -> Vec<Segment> {
        let labels: BTreeMap<usize, Handle> = self
            .live
            .iter()
            .filter_map(|(&handle, &ptr)| Some((self.target.as_dyn().offset_of(ptr)?, handle)))
            .collect();
        let used = |offset: usize, len: usize, payload: usize| Segment {
            range: offset..offset + len,
            state: SegmentState::Used(labels.get(&payload).copied()),
        };
        let free = |offset: usize, len: usize| Segment {
            range: offset..offset + len,
            state: SegmentState::Free,
        };

        let mut segments = match &self.target {
            Target::Linear(a) => linear_segments(&labels, a.offset(), a.buffer_size()),
            Target::Stack(a) => linear_segments(&labels, a.offset(), a.buffer_size()),
            Target::Pool(a) => (0..a.chunks_amount())
                .map(|index| index * a.chunk_size())
                .map(|offset| {
                    if labels.contains_key(&offset) {
                        used(offset, a.chunk_size(), offset)
                    } else {
                        free(offset, a.chunk_size())
                    }
                })
                .collect(),
            Target::FreeList(a) => a
                .free_chunks()
                .iter()
                .map(|chunk| Segment {
                    range: chunk.range(),
                    state: SegmentState::Free,
                })
                .chain(a.allocated_chunks().map(|chunk| Segment {
                    range: chunk.range(),
                    state: SegmentState::Used(labels.get(&chunk.offset).copied()),
                }))
                .collect(),
            Target::Intrusive(a) => a
                .free_chunks()
                .map(|chunk| free(chunk.offset, chunk.length + ALLOC_HEADER_SIZE))
                .chain(a.allocated_chunks().map(|chunk| {
                    used(
                        chunk.offset,
                        chunk.length + ALLOC_HEADER_SIZE,
                        chunk.offset + ALLOC_HEADER_SIZE,
                    )
                }))
                .collect(),
        };
        segments.sort_by_key(|segment| segment.range.start);
        segments
    }

    /// Returns the number of live handles.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.target.as_dyn().buffer_size()
    }
}

/// Segments for the bump allocators: each labelled allocation up to the
/// current offset, then the unused tail.
fn linear_segments(labels: &BTreeMap<usize, Handle>, offset: usize, len: usize) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut starts = labels.iter().filter(|(start, _)| **start < offset).peekable();
    let mut cursor = 0;
    while let Some((&start, &handle)) = starts.next() {
        if cursor < start {
            segments.push(Segment {
                range: cursor..start,
                state: SegmentState::Padding,
            });
        }
        let end = starts.peek().map_or(offset, |(next, _)| **next);
        segments.push(Segment {
            range: start..end,
            state: SegmentState::Used(Some(handle)),
        });
        cursor = end;
    }
    if cursor < offset {
        segments.push(Segment {
            range: cursor..offset,
            state: SegmentState::Padding,
        });
    }
    if offset < len {
        segments.push(Segment {
            range: offset..len,
            state: SegmentState::Free,
        });
    }
    segments
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace;

    fn session(kind: AllocatorKind, buffer_size: usize) -> Session {
        Session::new(Config {
            kind,
            buffer_size,
            chunk_size: 16,
            policy: FitPolicy::FirstFit,
        })
        .unwrap()
    }

    fn run(session: &mut Session, text: &str) -> Vec<Outcome> {
        trace::parse(text)
            .unwrap()
            .iter()
            .map(|line| session.apply(line).unwrap())
            .collect()
    }

    fn states(session: &Session) -> Vec<(usize, usize, SegmentState)> {
        session
            .segments()
            .into_iter()
            .map(|segment| (segment.range.start, segment.range.end, segment.state))
            .collect()
    }

    #[test]
    fn test_parse_allocator_kind() {
        for kind in ["linear", "stack", "pool", "free-list", "intrusive"] {
            assert_eq!(kind.parse::<AllocatorKind>().unwrap().to_string(), kind);
        }
        assert!("slab".parse::<AllocatorKind>().is_err());
    }

    #[test]
    fn test_init_failure() {
        let err = Session::new(Config {
            kind: AllocatorKind::Pool,
            buffer_size: 100,
            chunk_size: 16,
            policy: FitPolicy::FirstFit,
        })
        .unwrap_err();
        assert!(matches!(err, SessionError::Init { kind: AllocatorKind::Pool, .. }));
    }

    #[test]
    fn test_free_list_segments() {
        let mut session = session(AllocatorKind::FreeList, 64);
        let outcomes = run(&mut session, "alloc 16\nalloc 16\nfree @0\n");
        assert_eq!(
            outcomes,
            [
                Outcome::Allocated {
                    handle: Handle(0),
                    offset: 0
                },
                Outcome::Allocated {
                    handle: Handle(1),
                    offset: 16
                },
                Outcome::Freed(vec![Handle(0)]),
            ]
        );
        assert_eq!(
            states(&session),
            [
                (0, 16, SegmentState::Free),
                (16, 32, SegmentState::Used(Some(Handle(1)))),
                (32, 64, SegmentState::Free),
            ]
        );
    }

    #[test]
    fn test_intrusive_segments_include_header() {
        let mut session = session(AllocatorKind::Intrusive, 64);
        let outcomes = run(&mut session, "alloc 12\n");
        assert_eq!(
            outcomes,
            [Outcome::Allocated {
                handle: Handle(0),
                offset: ALLOC_HEADER_SIZE
            }]
        );
        let states = states(&session);
        assert_eq!(states[0], (0, 16, SegmentState::Used(Some(Handle(0)))));
        assert_eq!(states[1], (16, 64, SegmentState::Free));
    }

    #[test]
    fn test_stack_free_pops_last_handle() {
        let mut session = session(AllocatorKind::Stack, 128);
        let outcomes = run(&mut session, "alloc 8\nalloc 8\nfree\n");
        assert_eq!(outcomes[2], Outcome::Freed(vec![Handle(1)]));
        assert_eq!(session.live_count(), 1);
    }

    #[test]
    fn test_linear_free_releases_everything() {
        let mut session = session(AllocatorKind::Linear, 64);
        let outcomes = run(&mut session, "alloc 8\nalloc 8\nfree\n");
        assert_eq!(outcomes[2], Outcome::Freed(vec![Handle(0), Handle(1)]));
        assert_eq!(states(&session), [(0, 64, SegmentState::Free)]);
    }

    #[test]
    fn test_pool_rejects_oversized_request() {
        let mut session = session(AllocatorKind::Pool, 64);
        let outcomes = run(&mut session, "alloc 32\nalloc 16\n");
        assert_eq!(outcomes[0], Outcome::Exhausted);
        assert!(matches!(outcomes[1], Outcome::Allocated { .. }));
    }

    #[test]
    fn test_command_errors() {
        let mut session = session(AllocatorKind::Pool, 64);
        let lines = trace::parse("alloc 8 8\nfree\nfree @7\npolicy best\n").unwrap();
        assert!(matches!(
            session.apply(&lines[0]),
            Err(SessionError::Unsupported { line: 1, .. })
        ));
        assert!(matches!(
            session.apply(&lines[1]),
            Err(SessionError::MissingHandle { line: 2, .. })
        ));
        assert!(matches!(
            session.apply(&lines[2]),
            Err(SessionError::UnknownHandle { handle: Handle(7), .. })
        ));
        assert!(matches!(
            session.apply(&lines[3]),
            Err(SessionError::Unsupported { line: 4, .. })
        ));
    }

    #[test]
    fn test_reset_releases_buffer() {
        let mut session = session(AllocatorKind::FreeList, 64);
        run(&mut session, "alloc 8\nreset\n");
        assert_eq!(session.buffer_size(), 0);
        assert_eq!(session.live_count(), 0);
        assert!(session.segments().is_empty());
    }
}
