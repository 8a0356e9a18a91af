use crate::logging;
use crate::shared::RastaError;
use std::time::Instant;

/// Adapter to the hosting system: monotonic time, entropy and the fatal error
/// trap. The stack never reads clocks or randomness directly.
pub trait Platform {
    /// Monotonic timer value in milliseconds. Wraps around.
    fn get_timer_value(&self) -> u32;

    /// Granularity of the timer in milliseconds.
    fn get_timer_granularity(&self) -> u32;

    /// Random 32 bit value.
    fn get_random_number(&self) -> u32;

    /// Trap for unrecoverable errors. Expected not to return; if it does, the
    /// failing operation aborts and the stack must not be used further.
    fn fatal_error(&self, code: RastaError);

    /// Routes a fatal code to the trap and hands it back for propagation.
    #[inline]
    fn fail(&self, code: RastaError) -> RastaError {
        self.fatal_error(code);
        code
    }
}

/// Standard library backed platform adapter.
pub struct StdPlatform {
    epoch: Instant,
    log: logging::Logger,
}

impl StdPlatform {
    #[inline]
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(log: L) -> StdPlatform {
        let log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::test(),
        };

        StdPlatform {
            epoch: Instant::now(),
            log,
        }
    }
}

impl Platform for StdPlatform {
    #[inline]
    fn get_timer_value(&self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    #[inline]
    fn get_timer_granularity(&self) -> u32 {
        1
    }

    #[inline]
    fn get_random_number(&self) -> u32 {
        rand::random::<u32>()
    }

    fn fatal_error(&self, code: RastaError) {
        logging::crit!(self.log, "unrecoverable protocol failure"; "code" => ?code);
        panic!("Unrecoverable protocol failure: {:?}", code);
    }
}
