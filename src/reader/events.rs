//! Event waiter over the driver's readiness event sets.

use crate::error::Result;
use crate::native::{call, EventMask, EventSetToken, PortToken, SerialDriver};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// A driver event set plus the ports registered on it.
///
/// Released explicitly with [`EventSet::release`] on the clean exit paths of
/// the reader loop; dropping an unreleased set releases it as well.
pub struct EventSet {
    driver: Arc<dyn SerialDriver>,
    token: EventSetToken,
    released: bool,
}

impl EventSet {
    pub fn create(driver: Arc<dyn SerialDriver>) -> Result<Self> {
        let mut token: EventSetToken = 0;
        call(driver.as_ref(), || driver.new_event_set(&mut token))?;
        trace!(event_set = token, "event set created");
        Ok(Self {
            driver,
            token,
            released: false,
        })
    }

    /// Register `mask` conditions for `port`.
    pub fn add_interest(&self, port: PortToken, mask: EventMask) -> Result<()> {
        call(self.driver.as_ref(), || {
            self.driver.add_port_events(self.token, port, mask)
        })?;
        Ok(())
    }

    /// Block until a registered condition fires or `timeout` passes.
    ///
    /// Returning without an event is normal; callers query the port next.
    /// The driver reads 0 ms as "wait forever", so shorter timeouts round
    /// up to 1 ms.
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let ms = u32::try_from(timeout.as_millis())
            .unwrap_or(u32::MAX)
            .max(1);
        call(self.driver.as_ref(), || self.driver.wait(self.token, ms))?;
        Ok(())
    }

    /// Bytes buffered on `port`.
    ///
    /// An error here means the port went away or faulted; the reader loop
    /// treats it as the end of the session.
    pub fn input_waiting(&self, port: PortToken) -> Result<usize> {
        let count = call(self.driver.as_ref(), || self.driver.input_waiting(port))?;
        Ok(count as usize)
    }

    pub fn token(&self) -> EventSetToken {
        self.token
    }

    pub fn release(mut self) {
        self.free();
    }

    fn free(&mut self) {
        if !self.released {
            self.driver.free_event_set(self.token);
            self.released = true;
            trace!(event_set = self.token, "event set released");
        }
    }
}

impl Drop for EventSet {
    fn drop(&mut self) {
        self.free();
    }
}

impl std::fmt::Debug for EventSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSet")
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SerialError;
    use crate::native::{MockDevice, MockDriver, MockSerialDriver, OpenMode, SP_ERR_FAIL, SP_OK};
    use mockall::predicate::eq;

    fn open_port(driver: &MockDriver, name: &str) -> PortToken {
        driver.add_device(MockDevice::new(name));
        let mut token = 0;
        driver.get_port_by_name(name, &mut token);
        driver.open(token, OpenMode::Read);
        token
    }

    #[test]
    fn test_release_is_counted_once() {
        let driver = Arc::new(MockDriver::new());
        let port = open_port(&driver, "MOCK0");

        let events = EventSet::create(driver.clone()).unwrap();
        events
            .add_interest(port, EventMask::RX_READY | EventMask::ERROR)
            .unwrap();
        events.wait(Duration::from_millis(1)).unwrap();
        events.release();

        assert_eq!(driver.event_set_counts(), (1, 1));
        assert_eq!(driver.wait_count(), 1);
    }

    #[test]
    fn test_drop_releases_unreleased_set() {
        let driver = Arc::new(MockDriver::new());
        drop(EventSet::create(driver.clone()).unwrap());
        assert_eq!(driver.event_set_counts(), (1, 1));
    }

    #[test]
    fn test_interest_on_closed_port_fails() {
        let driver = Arc::new(MockDriver::new());
        driver.add_device(MockDevice::new("MOCK0"));
        let mut port = 0;
        driver.get_port_by_name("MOCK0", &mut port);

        let events = EventSet::create(driver.clone()).unwrap();
        let err = events.add_interest(port, EventMask::RX_READY).unwrap_err();
        assert!(matches!(err, SerialError::NativeCall { .. }));
    }

    #[test]
    fn test_input_waiting_sentinel_is_error() {
        let driver = Arc::new(MockDriver::new());
        let port = open_port(&driver, "MOCK0");
        driver.script_input_waiting("MOCK0", [4, SP_ERR_FAIL]);

        let events = EventSet::create(driver.clone()).unwrap();
        assert_eq!(events.input_waiting(port).unwrap(), 4);
        match events.input_waiting(port).unwrap_err() {
            SerialError::NativeCall { code, .. } => assert_eq!(code, 5),
            other => panic!("Expected NativeCall error, got: {:?}", other),
        }
    }

    #[test]
    fn test_sub_millisecond_wait_never_means_forever() {
        let mut driver = MockSerialDriver::new();
        driver.expect_new_event_set().returning(|set| {
            *set = 0x70;
            SP_OK
        });
        driver
            .expect_wait()
            .with(eq(0x70), eq(1))
            .times(2)
            .return_const(SP_OK);
        driver
            .expect_wait()
            .with(eq(0x70), eq(20))
            .times(1)
            .return_const(SP_OK);
        driver.expect_free_event_set().with(eq(0x70)).times(1).return_const(());

        let events = EventSet::create(Arc::new(driver)).unwrap();
        events.wait(Duration::from_micros(500)).unwrap();
        events.wait(Duration::ZERO).unwrap();
        events.wait(Duration::from_millis(20)).unwrap();
        events.release();
    }
}
