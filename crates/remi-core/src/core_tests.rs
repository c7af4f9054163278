use std::{
    cell::Cell,
    time::{Duration, Instant},
};

use zerocopy::{FromBytes, IntoBytes};

use crate::{
    AttachState, ErrorKind, ProcessId, RemiCore, RemiDriver, RemiError, RemiInfo, RemiRead,
    RemoteAddress,
};

///////////////////////////////////////////////////////////////////////////////
// Mock Driver
///////////////////////////////////////////////////////////////////////////////

const BASE: RemoteAddress = RemoteAddress(0x7f00_0000_1000);

struct MockDriver {
    memory: Vec<u8>,
    busy_for: Cell<Option<Duration>>,
    busy_until: Cell<Option<Instant>>,
    failure: Cell<Option<fn() -> RemiError>>,
    attempts: Cell<usize>,
    paused: Cell<bool>,
}

impl MockDriver {
    fn new() -> Self {
        Self {
            memory: (0..=255u8).cycle().take(4096).collect(),
            busy_for: Cell::new(None),
            busy_until: Cell::new(None),
            failure: Cell::new(None),
            attempts: Cell::new(0),
            paused: Cell::new(false),
        }
    }

    /// Makes attempts fail with `Busy` for `duration`, counted from the
    /// first attempt.
    fn busy_for(&self, duration: Duration) {
        self.busy_for.set(Some(duration));
    }
}

impl RemiDriver for MockDriver {
    fn info(&self) -> Result<RemiInfo, RemiError> {
        Ok(RemiInfo {
            pid: ProcessId(4242),
            page_size: 4096,
        })
    }

    fn state(&self) -> AttachState {
        AttachState::Attached
    }

    fn pause(&self) -> Result<(), RemiError> {
        self.paused.set(true);
        Ok(())
    }

    fn resume(&self) -> Result<(), RemiError> {
        self.paused.set(false);
        Ok(())
    }

    fn detach(&self) -> Result<(), RemiError> {
        Ok(())
    }
}

impl RemiRead for MockDriver {
    fn read_memory(&self, address: RemoteAddress, buffer: &mut [u8]) -> Result<(), RemiError> {
        self.attempts.set(self.attempts.get() + 1);

        if let Some(failure) = self.failure.get() {
            return Err(failure());
        }

        if let Some(duration) = self.busy_for.take() {
            self.busy_until.set(Some(Instant::now() + duration));
        }

        if let Some(until) = self.busy_until.get() {
            if Instant::now() < until {
                return Err(RemiError::Busy);
            }
        }

        let offset = (address - BASE) as usize;
        let source = self
            .memory
            .get(offset..offset + buffer.len())
            .ok_or(RemiError::Other("unmapped"))?;
        buffer.copy_from_slice(source);
        Ok(())
    }
}

fn no_such_process() -> RemiError {
    RemiError::NoSuchProcess
}

fn make_core() -> Result<RemiCore<MockDriver>, RemiError> {
    RemiCore::new(MockDriver::new())
}

///////////////////////////////////////////////////////////////////////////////
// Reads
///////////////////////////////////////////////////////////////////////////////

#[test]
fn read_is_idempotent_under_quiescence() -> Result<(), RemiError> {
    let core = make_core()?;

    let mut first = [0u8; 64];
    let mut second = [0u8; 64];
    core.read(BASE + 100, &mut first)?;
    core.read(BASE + 100, &mut second)?;

    assert_eq!(first, second);
    assert_eq!(first[0], 100);
    Ok(())
}

#[test]
fn read_into_returns_filled_prefix() -> Result<(), RemiError> {
    let core = make_core()?;

    let mut buffer = [0xffu8; 32];
    let data = core.read_into(BASE + 4, &mut buffer, 4)?;

    assert_eq!(data, &[4, 5, 6, 7]);
    assert_eq!(buffer[4], 0xff);
    Ok(())
}

#[test]
fn read_into_rejects_length_beyond_capacity() -> Result<(), RemiError> {
    let core = make_core()?;

    let mut buffer = [0u8; 16];
    let err = core.read_into(BASE, &mut buffer, 17).unwrap_err();

    assert!(matches!(
        err,
        RemiError::OutOfBounds {
            length: 17,
            capacity: 16
        }
    ));
    assert!(err.is_programming_error());
    assert_eq!(core.driver().attempts.get(), 0);
    Ok(())
}

#[test]
fn read_rejects_range_past_end_of_address_space() -> Result<(), RemiError> {
    let core = make_core()?;

    let mut buffer = [0u8; 8];
    let err = core.read(RemoteAddress(u64::MAX - 4), &mut buffer).unwrap_err();

    assert!(matches!(
        err,
        RemiError::AddressOverflow(RemoteAddress(address)) if address == u64::MAX - 4
    ));
    assert_eq!(err.kind(), ErrorKind::InspectionFailure);
    assert!(!err.is_programming_error());

    let err = core.read_u64(RemoteAddress(u64::MAX)).unwrap_err();
    assert!(matches!(err, RemiError::AddressOverflow(_)));
    assert_eq!(core.driver().attempts.get(), 0);
    Ok(())
}

#[test]
fn read_scalars() -> Result<(), RemiError> {
    let core = make_core()?;

    assert_eq!(core.read_u32(BASE)?, u32::from_ne_bytes([0, 1, 2, 3]));
    assert_eq!(
        core.read_u64(BASE + 8)?,
        u64::from_ne_bytes([8, 9, 10, 11, 12, 13, 14, 15])
    );
    assert_eq!(
        core.read_word(BASE)?,
        usize::from_ne_bytes(std::array::from_fn(|i| i as u8)) as u64
    );
    Ok(())
}

#[derive(FromBytes, IntoBytes)]
#[repr(C)]
struct Pair {
    first: u32,
    second: u32,
}

#[test]
fn read_struct() -> Result<(), RemiError> {
    let core = make_core()?;

    let pair: Pair = core.read_struct(BASE + 16)?;
    assert_eq!(pair.first, u32::from_ne_bytes([16, 17, 18, 19]));
    assert_eq!(pair.second, u32::from_ne_bytes([20, 21, 22, 23]));
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Bounded Retry
///////////////////////////////////////////////////////////////////////////////

#[test]
fn busy_target_is_retried_and_reported() -> Result<(), RemiError> {
    let core = make_core()?;
    core.driver().busy_for(Duration::from_millis(50));

    let value = core.read_u32(BASE)?;

    assert_eq!(value, u32::from_ne_bytes([0, 1, 2, 3]));
    assert!(core.driver().attempts.get() > 1);
    assert!(core.last_wait() >= Duration::from_millis(50));
    assert_eq!(core.long_waits(), 1);
    Ok(())
}

#[test]
fn busy_target_beyond_window_times_out() -> Result<(), RemiError> {
    let core = make_core()?;
    core.driver().busy_for(Duration::from_millis(150));

    let start = Instant::now();
    let err = core.read_u32(BASE).unwrap_err();

    assert!(matches!(err, RemiError::Timeout(address) if address == BASE));
    assert_eq!(err.kind(), ErrorKind::InspectionFailure);
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert_eq!(core.long_waits(), 0);
    Ok(())
}

#[test]
fn quick_read_is_not_a_long_wait() -> Result<(), RemiError> {
    let core = make_core()?;

    core.read_u32(BASE)?;

    assert_eq!(core.driver().attempts.get(), 1);
    assert_eq!(core.long_waits(), 0);
    Ok(())
}

#[test]
fn hard_failures_are_not_retried() -> Result<(), RemiError> {
    let core = make_core()?;
    core.driver()
        .failure
        .set(Some(no_such_process as fn() -> RemiError));

    let err = core.read_u32(BASE).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NoSuchProcess);
    assert_eq!(core.driver().attempts.get(), 1);
    Ok(())
}

#[test]
fn custom_retry_window() -> Result<(), RemiError> {
    let core = make_core()?
        .with_retry_policy(crate::RetryPolicy::default().with_window(Duration::from_millis(10)));
    core.driver().busy_for(Duration::from_millis(50));

    assert!(matches!(core.read_u32(BASE), Err(RemiError::Timeout(_))));
    Ok(())
}

///////////////////////////////////////////////////////////////////////////////
// Pause Guard
///////////////////////////////////////////////////////////////////////////////

#[test]
fn pause_guard_resumes_on_drop() -> Result<(), RemiError> {
    let core = make_core()?;

    {
        let _pause_guard = core.pause_guard()?;
        assert!(core.driver().paused.get());
    }

    assert!(!core.driver().paused.get());
    Ok(())
}
