//! Mock construction helpers

use mockall::mock;
use sensorhub_rs::hub::SampleSource;
use sensorhub_rs::{Result, TimedXyz};

mock! {
    pub Hardware {}

    impl SampleSource for Hardware {
        type Sample = TimedXyz;

        fn open(&mut self) -> Result<()>;
        fn close(&mut self);
        fn read_sample(&mut self) -> Result<Option<TimedXyz>>;
    }
}

/// Hardware that opens and closes any number of times and always has a
/// sample ready
pub fn create_test_hardware() -> MockHardware {
    let mut hw = MockHardware::new();
    hw.expect_open().returning(|| Ok(()));
    hw.expect_close().return_const(());
    hw.expect_read_sample()
        .returning(|| Ok(Some(TimedXyz::new(0, 0, 0, -1000))));
    hw
}
