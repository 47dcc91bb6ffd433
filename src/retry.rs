//! A keyed cache of asynchronous loads that backs off after failures.
//!
//! Concurrent requesters of the same key share one in-flight load. A failed load is evicted and
//! opens a cooldown window (capped exponential backoff) during which further requests fail fast
//! with [`Error::Cooldown`] instead of loading again.

use crate::{error::Error, platform::Platform};
use core::{cell::RefCell, fmt, time::Duration};
use futures::{
	future::{self, LocalBoxFuture, Shared},
	FutureExt as _,
};
use hashbrown::HashMap;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Retry timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	/// Delay after the first failure. Doubles with each consecutive failure.
	pub base: Duration,
	pub max: Duration,
	/// Failed attempts after which automatic retries (of island mounts) stop.
	pub max_attempts: u32,
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base: Duration::from_millis(100),
			max: Duration::from_secs(5),
			max_attempts: 5,
		}
	}
}

impl Backoff {
	/// The cooldown after `failures` consecutive failures.
	#[must_use]
	pub fn delay(&self, failures: u32) -> Duration {
		if failures == 0 {
			return Duration::ZERO;
		}
		let factor = 1_u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
		self.base.saturating_mul(factor).min(self.max)
	}
}

type SharedLoad<T> = Shared<LocalBoxFuture<'static, Result<T, Error>>>;

struct Slot<T: Clone> {
	pending: Option<SharedLoad<T>>,
	failures: u32,
	retry_at: Option<Duration>,
}

impl<T: Clone> Default for Slot<T> {
	fn default() -> Self {
		Self { pending: None, failures: 0, retry_at: None }
	}
}

pub struct RetryCache<T: Clone> {
	platform: Rc<dyn Platform>,
	backoff: Backoff,
	slots: Rc<RefCell<HashMap<String, Slot<T>>>>,
}

impl<T: Clone> fmt::Debug for RetryCache<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RetryCache").field("backoff", &self.backoff).field("len", &self.slots.borrow().len()).finish_non_exhaustive()
	}
}

impl<T: 'static + Clone> RetryCache<T> {
	#[must_use]
	pub fn new(platform: Rc<dyn Platform>, backoff: Backoff) -> Self {
		Self {
			platform,
			backoff,
			slots: Rc::default(),
		}
	}

	#[must_use]
	pub fn backoff(&self) -> Backoff {
		self.backoff
	}

	/// Returns the cached load for `key`, or starts one with `produce`.
	///
	/// `produce` is not called while `key` is cooling down or already loading.
	pub fn load(&self, key: &str, produce: impl FnOnce() -> LocalBoxFuture<'static, Result<T, Error>>) -> LocalBoxFuture<'static, Result<T, Error>> {
		{
			let slots = self.slots.borrow();
			if let Some(slot) = slots.get(key) {
				if let Some(pending) = &slot.pending {
					return pending.clone().boxed_local();
				}
				if let Some(remaining) = slot.retry_at.and_then(|retry_at| retry_at.checked_sub(self.platform.now())).filter(|remaining| !remaining.is_zero()) {
					trace!("{:?} is cooling down for another {:?}.", key, remaining);
					return future::ready(Err(Error::Cooldown {
						url: key.to_owned(),
						failures: slot.failures,
						remaining,
					}))
					.boxed_local();
				}
			}
		}

		let source = produce();
		let shared = Self::track(Rc::downgrade(&self.slots), Rc::clone(&self.platform), self.backoff, key.to_owned(), source).boxed_local().shared();
		self.slots.borrow_mut().entry(key.to_owned()).or_default().pending = Some(shared.clone());
		shared.boxed_local()
	}

	async fn track(slots: Weak<RefCell<HashMap<String, Slot<T>>>>, platform: Rc<dyn Platform>, backoff: Backoff, key: String, source: LocalBoxFuture<'static, Result<T, Error>>) -> Result<T, Error> {
		let result = source.await;
		let slots = match slots.upgrade() {
			Some(slots) => slots,
			None => return result,
		};
		let mut slots = slots.borrow_mut();
		let slot = match slots.get_mut(&key) {
			Some(slot) => slot,
			None => return result,
		};
		match &result {
			Ok(_) => {
				slot.failures = 0;
				slot.retry_at = None;
			}
			Err(error) => {
				slot.pending = None;
				slot.failures += 1;
				let delay = backoff.delay(slot.failures);
				slot.retry_at = Some(platform.now() + delay);
				warn!("Load of {:?} failed ({} consecutive failure(s)), cooling down for {:?}: {}", key, slot.failures, delay, error);
			}
		}
		result
	}

	/// Consecutive failures recorded for `key`.
	#[must_use]
	pub fn failures(&self, key: &str) -> u32 {
		self.slots.borrow().get(key).map_or(0, |slot| slot.failures)
	}

	/// How long `key` still cools down, if at all.
	#[must_use]
	pub fn cooldown_remaining(&self, key: &str) -> Option<Duration> {
		let now = self.platform.now();
		self.slots
			.borrow()
			.get(key)
			.and_then(|slot| slot.retry_at)
			.and_then(|retry_at| retry_at.checked_sub(now))
			.filter(|remaining| !remaining.is_zero())
	}

	/// Forgets all loads, failures and cooldowns.
	pub fn clear(&self) {
		self.slots.borrow_mut().clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FakePlatform;
	use core::cell::Cell;

	#[test]
	fn delays() {
		let backoff = Backoff::default();
		assert_eq!(backoff.delay(0), Duration::ZERO);
		assert_eq!(backoff.delay(1), Duration::from_millis(100));
		assert_eq!(backoff.delay(2), Duration::from_millis(200));
		assert_eq!(backoff.delay(4), Duration::from_millis(800));
		assert_eq!(backoff.delay(7), Duration::from_secs(5));
		assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(5));
	}

	fn failing_then(attempts: &Rc<Cell<u32>>, fail_until: u32) -> impl FnOnce() -> LocalBoxFuture<'static, Result<u32, Error>> {
		let attempts = Rc::clone(attempts);
		move || {
			attempts.set(attempts.get() + 1);
			let attempt = attempts.get();
			future::ready(if attempt <= fail_until {
				Err(Error::Load { url: "/m.js".to_owned(), reason: format!("attempt {}", attempt) })
			} else {
				Ok(attempt)
			})
			.boxed_local()
		}
	}

	#[test]
	fn concurrent_requesters_share_one_load() {
		let platform = FakePlatform::new();
		let cache = RetryCache::<u32>::new(platform.clone(), Backoff::default());
		let attempts = Rc::new(Cell::new(0));

		let a = cache.load("/m.js", failing_then(&attempts, 0));
		let b = cache.load("/m.js", failing_then(&attempts, 0));
		assert_eq!(platform.block_on(a), Ok(1));
		assert_eq!(platform.block_on(b), Ok(1));
		assert_eq!(platform.block_on(cache.load("/m.js", failing_then(&attempts, 0))), Ok(1));
		assert_eq!(attempts.get(), 1);
	}

	#[test]
	fn failure_opens_cooldown() {
		let platform = FakePlatform::new();
		let cache = RetryCache::<u32>::new(platform.clone(), Backoff::default());
		let attempts = Rc::new(Cell::new(0));

		assert!(matches!(platform.block_on(cache.load("/m.js", failing_then(&attempts, 1))), Err(Error::Load { .. })));
		assert_eq!(cache.failures("/m.js"), 1);
		assert_eq!(cache.cooldown_remaining("/m.js"), Some(Duration::from_millis(100)));

		platform.advance(Duration::from_millis(50));
		assert!(matches!(platform.block_on(cache.load("/m.js", failing_then(&attempts, 1))), Err(Error::Cooldown { failures: 1, .. })));
		assert_eq!(attempts.get(), 1);

		platform.advance(Duration::from_millis(60));
		assert_eq!(platform.block_on(cache.load("/m.js", failing_then(&attempts, 1))), Ok(2));
		assert_eq!(cache.failures("/m.js"), 0);
		assert_eq!(cache.cooldown_remaining("/m.js"), None);
	}

	#[test]
	fn clear_forgets_cooldown() {
		let platform = FakePlatform::new();
		let cache = RetryCache::<u32>::new(platform.clone(), Backoff::default());
		let attempts = Rc::new(Cell::new(0));

		assert!(platform.block_on(cache.load("/m.js", failing_then(&attempts, 1))).is_err());
		cache.clear();
		assert_eq!(platform.block_on(cache.load("/m.js", failing_then(&attempts, 1))), Ok(2));
	}
}
