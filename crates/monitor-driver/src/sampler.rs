//! Card-management power sampler.
//!
//! On platforms without an on-chip ADC, power comes from the card manager:
//! a worker thread multiplies its current and voltage words once per sample
//! period into the power region. The region buffer moves into the thread on
//! start and comes back through the join handle on stop, so no lock guards it.

use crate::error::{MonitorError, Result};
use crate::mmio::RegisterIo;
use crate::platform::CmsWindow;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// What the sampler hands back when it stops.
#[derive(Debug)]
pub struct SamplerOutcome {
    /// The power buffer, with `count` leading samples filled
    pub buffer: Vec<u32>,
    /// Samples taken
    pub count: usize,
    /// First register error the thread hit, if any
    pub error: Option<MonitorError>,
}

/// A running sampler thread.
#[derive(Debug)]
pub struct CmsSampler {
    running: Arc<AtomicBool>,
    count: Arc<AtomicUsize>,
    window: Arc<dyn RegisterIo>,
    layout: CmsWindow,
    capacity: usize,
    handle: JoinHandle<SamplerOutcome>,
}

impl CmsSampler {
    /// Enable the card manager and start sampling into `buffer`.
    ///
    /// Sampling ends when [`Self::stop`] is called or `buffer` is full.
    ///
    /// # Errors
    ///
    /// - Register errors writing the reset word
    /// - [`MonitorError::Sampler`] if the thread cannot be spawned
    pub fn start(
        window: Arc<dyn RegisterIo>,
        layout: CmsWindow,
        period: Duration,
        buffer: Vec<u32>,
    ) -> Result<Self> {
        window.write32(layout.reset_word, 1)?;

        let running = Arc::new(AtomicBool::new(true));
        let count = Arc::new(AtomicUsize::new(0));
        let capacity = buffer.len();

        let worker = Worker {
            window: Arc::clone(&window),
            layout,
            period,
            running: Arc::clone(&running),
            count: Arc::clone(&count),
        };
        let handle = std::thread::Builder::new()
            .name("monitor-cms".into())
            .spawn(move || worker.run(buffer))
            .map_err(|e| {
                // Leave the card manager as we found it.
                let _ = window.write32(layout.reset_word, 0);
                MonitorError::sampler(format!("cannot spawn sampler thread: {e}"))
            })?;

        tracing::debug!("CMS sampler started: capacity={capacity}, period={period:?}");

        Ok(Self {
            running,
            count,
            window,
            layout,
            capacity,
            handle,
        })
    }

    /// Samples taken so far.
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// The thread has not exited yet.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Clear the running flag, disable the card manager and join.
    ///
    /// Returns within roughly one sample period.
    pub fn stop(self) -> SamplerOutcome {
        self.running.store(false, Ordering::Release);
        self.handle.thread().unpark();

        let reset = self.window.write32(self.layout.reset_word, 0);

        let mut outcome = self.handle.join().unwrap_or_else(|_| {
            tracing::error!("CMS sampler thread panicked");
            SamplerOutcome {
                buffer: vec![0; self.capacity],
                count: 0,
                error: Some(MonitorError::sampler("sampler thread panicked")),
            }
        });
        if let Err(e) = reset {
            outcome.error.get_or_insert(e);
        }

        tracing::debug!("CMS sampler stopped after {} samples", outcome.count);
        outcome
    }
}

struct Worker {
    window: Arc<dyn RegisterIo>,
    layout: CmsWindow,
    period: Duration,
    running: Arc<AtomicBool>,
    count: Arc<AtomicUsize>,
}

impl Worker {
    fn run(self, mut buffer: Vec<u32>) -> SamplerOutcome {
        let mut count = 0;
        let mut error = None;

        while self.running.load(Ordering::Acquire) && count < buffer.len() {
            match self.sample() {
                Ok(power) => {
                    buffer[count] = power;
                    count += 1;
                    self.count.store(count, Ordering::Release);
                    tracing::trace!("CMS sample {count}: {power}");
                }
                Err(e) => {
                    tracing::error!("CMS sampler failed: {e}");
                    error = Some(MonitorError::sampler(e.to_string()));
                    break;
                }
            }
            self.sleep();
        }

        SamplerOutcome {
            buffer,
            count,
            error,
        }
    }

    /// current * voltage, wrapping like the 32-bit hardware product.
    fn sample(&self) -> Result<u32> {
        let current = self.window.read32(self.layout.current())?;
        let voltage = self.window.read32(self.layout.voltage())?;
        Ok(current.wrapping_mul(voltage))
    }

    /// Park for one period, waking early when stopped.
    fn sleep(&self) {
        let deadline = Instant::now() + self.period;
        while self.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::park_timeout(deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Words(Mutex<Vec<u32>>);

    impl RegisterIo for Words {
        fn read32(&self, word: usize) -> Result<u32> {
            let words = self.0.lock().unwrap();
            words.get(word).copied().ok_or(MonitorError::OutOfBounds {
                word,
                limit: words.len(),
            })
        }

        fn write32(&self, word: usize, value: u32) -> Result<()> {
            let mut words = self.0.lock().unwrap();
            let limit = words.len();
            *words
                .get_mut(word)
                .ok_or(MonitorError::OutOfBounds { word, limit })? = value;
            Ok(())
        }

        fn words(&self) -> usize {
            self.0.lock().unwrap().len()
        }
    }

    fn window(current: u32, voltage: u32) -> (Arc<Words>, CmsWindow) {
        let layout = CmsWindow::u250();
        let mut words = vec![0; layout.size / 4];
        words[layout.current()] = current;
        words[layout.voltage()] = voltage;
        (Arc::new(Words(Mutex::new(words))), layout)
    }

    #[test]
    fn fills_buffer_then_exits() {
        let (words, layout) = window(3, 12_000);
        let sampler = CmsSampler::start(
            words.clone(),
            layout,
            Duration::from_millis(1),
            vec![0; 5],
        )
        .unwrap();
        assert_eq!(words.read32(layout.reset_word).unwrap(), 1);

        while sampler.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let outcome = sampler.stop();
        assert!(outcome.error.is_none());
        assert_eq!(outcome.count, 5);
        assert_eq!(outcome.buffer, vec![36_000; 5]);
        assert_eq!(words.read32(layout.reset_word).unwrap(), 0);
    }

    #[test]
    fn stop_returns_within_a_period() {
        let (words, layout) = window(2, 2);
        let sampler = CmsSampler::start(
            words,
            layout,
            Duration::from_millis(120),
            vec![0; 1024],
        )
        .unwrap();
        std::thread::sleep(Duration::from_millis(20));

        let begin = Instant::now();
        let outcome = sampler.stop();
        assert!(begin.elapsed() < Duration::from_millis(240));
        assert!(outcome.count >= 1);
        assert!(outcome.buffer[..outcome.count].iter().all(|&p| p == 4));
        assert_eq!(outcome.buffer.len(), 1024);
    }

    #[test]
    fn product_wraps() {
        let (words, layout) = window(0x1_0000, 0x1_0001);
        let sampler =
            CmsSampler::start(words, layout, Duration::from_millis(1), vec![0; 1]).unwrap();
        while sampler.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sampler.stop().buffer[0], 0x1_0000);
    }

    #[test]
    fn register_error_is_latched() {
        let layout = CmsWindow::u250();
        // Large enough for the reset word, too small for the sensor map.
        let words = Arc::new(Words(Mutex::new(vec![0; layout.reset_word + 1])));
        let sampler =
            CmsSampler::start(words, layout, Duration::from_millis(1), vec![0; 4]).unwrap();
        while sampler.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }
        let outcome = sampler.stop();
        assert_eq!(outcome.count, 0);
        assert_eq!(outcome.error.unwrap().kind(), crate::ErrorKind::Sampler);
    }
}
