//! Mount strategies and the scheduler that arms them.
//!
//! Each strategy is a [`SchedulerFn`] in [`SCHEDULERS`]. A scheduling call fires its mount
//! callback at most once, and never after it was canceled.

use crate::{
	attributes::{DEFAULT_MOUNT_EVENT, DEFAULT_VISIBLE_ROOT_MARGIN},
	platform::{Disposer, ElementRef, Platform},
};
use core::{
	cell::{Cell, RefCell},
	fmt,
	str::FromStr,
	time::Duration,
};
use std::rc::{Rc, Weak};
use thiserror::Error;
use tracing::{instrument, trace};

/// When an island mounts on the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ClientStrategy {
	/// On the next microtask.
	#[default]
	Load,
	/// Once the browser is idle.
	Idle,
	/// Once the host comes near the viewport.
	Visible,
	/// On the first `mouseover` or `focusin`.
	Hover,
	/// On the first of a list of DOM events (`click` by default).
	Event,
	/// Whenever an externally supplied signal reads `true`. Programmatic islands only.
	Signal,
	/// Like [`ClientStrategy::Load`], but never hydrates.
	Only,
}

impl ClientStrategy {
	pub const ALL: [Self; 7] = [Self::Load, Self::Idle, Self::Visible, Self::Hover, Self::Event, Self::Signal, Self::Only];

	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			ClientStrategy::Load => "load",
			ClientStrategy::Idle => "idle",
			ClientStrategy::Visible => "visible",
			ClientStrategy::Hover => "hover",
			ClientStrategy::Event => "event",
			ClientStrategy::Signal => "signal",
			ClientStrategy::Only => "only",
		}
	}
}

impl fmt::Display for ClientStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown client strategy {0:?}")]
pub struct UnknownStrategy(pub String);

impl FromStr for ClientStrategy {
	type Err = UnknownStrategy;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL.into_iter().find(|strategy| strategy.as_str() == s).ok_or_else(|| UnknownStrategy(s.to_owned()))
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleOptions {
	/// Root margin for [`ClientStrategy::Visible`].
	pub visible_root_margin: String,
	/// Event names for [`ClientStrategy::Event`]. Empty means `click`.
	pub events: Vec<String>,
}

impl Default for ScheduleOptions {
	fn default() -> Self {
		Self {
			visible_root_margin: DEFAULT_VISIBLE_ROOT_MARGIN.to_owned(),
			events: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Pending,
	Mounted,
	Canceled,
}

/// The once-only guard around one scheduled mount callback.
pub struct MountOnce {
	phase: Cell<Phase>,
	mount: RefCell<Option<Box<dyn FnOnce()>>>,
}

impl fmt::Debug for MountOnce {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("MountOnce").field(&self.phase.get()).finish()
	}
}

impl MountOnce {
	pub fn new(mount: impl 'static + FnOnce()) -> Rc<Self> {
		Rc::new(Self {
			phase: Cell::new(Phase::Pending),
			mount: RefCell::new(Some(Box::new(mount))),
		})
	}

	#[must_use]
	pub fn phase(&self) -> Phase {
		self.phase.get()
	}

	/// Runs the mount callback, unless it already ran or was canceled.
	pub fn fire(&self) {
		if self.phase.get() != Phase::Pending {
			return;
		}
		self.phase.set(Phase::Mounted);
		let mount = self.mount.borrow_mut().take();
		if let Some(mount) = mount {
			mount();
		}
	}

	pub fn cancel(&self) {
		if self.phase.get() == Phase::Pending {
			self.phase.set(Phase::Canceled);
			drop(self.mount.borrow_mut().take());
		}
	}
}

/// Arms `mount` on `host`. The returned [`Disposer`] removes whatever was registered.
pub type SchedulerFn = fn(platform: &Rc<dyn Platform>, host: &ElementRef, mount: &Rc<MountOnce>, options: &ScheduleOptions) -> Disposer;

/// Every strategy's scheduler.
pub static SCHEDULERS: [(ClientStrategy, SchedulerFn); 7] = [
	(ClientStrategy::Load, schedule_load),
	(ClientStrategy::Only, schedule_load),
	(ClientStrategy::Idle, schedule_idle),
	(ClientStrategy::Visible, schedule_visible),
	(ClientStrategy::Hover, schedule_hover),
	(ClientStrategy::Event, schedule_event),
	(ClientStrategy::Signal, schedule_signal),
];

#[must_use]
pub fn scheduler_for(strategy: ClientStrategy) -> SchedulerFn {
	SCHEDULERS.iter().find(|(candidate, _)| *candidate == strategy).map_or(schedule_load as SchedulerFn, |(_, scheduler)| *scheduler)
}

/// Schedules `mount` on `host` according to `strategy`.
///
/// Disposing the result cancels the mount (if it hasn't fired yet) and removes all listeners,
/// observers and timers.
#[instrument(level = "trace", skip(platform, host, mount, options), fields(host = ?host.id()))]
pub fn schedule(platform: &Rc<dyn Platform>, strategy: ClientStrategy, host: &ElementRef, mount: impl 'static + FnOnce(), options: &ScheduleOptions) -> Disposer {
	let once = MountOnce::new(mount);
	let teardown = scheduler_for(strategy)(platform, host, &once, options);
	Disposer::new(move || {
		once.cancel();
		teardown.dispose();
	})
}

fn schedule_load(platform: &Rc<dyn Platform>, _host: &ElementRef, mount: &Rc<MountOnce>, _options: &ScheduleOptions) -> Disposer {
	let mount = Rc::clone(mount);
	platform.queue_microtask(Box::new(move || mount.fire()));
	Disposer::noop()
}

fn schedule_idle(platform: &Rc<dyn Platform>, _host: &ElementRef, mount: &Rc<MountOnce>, _options: &ScheduleOptions) -> Disposer {
	if !platform.has_window() {
		mount.fire();
		return Disposer::noop();
	}

	let fire = {
		let mount = Rc::clone(mount);
		Box::new(move || mount.fire())
	};
	if platform.supports_idle_callback() {
		platform.request_idle_callback(fire)
	} else {
		platform.set_timeout(Duration::from_millis(1), fire)
	}
}

fn schedule_visible(platform: &Rc<dyn Platform>, host: &ElementRef, mount: &Rc<MountOnce>, options: &ScheduleOptions) -> Disposer {
	if !platform.supports_intersection_observer() {
		trace!("No intersection observer, falling back to `load`.");
		return schedule_load(platform, host, mount, options);
	}

	let observer = Rc::new(RefCell::new(None::<Disposer>));
	let on_entry = {
		let mount = Rc::clone(mount);
		let observer = Rc::downgrade(&observer);
		Box::new(move |is_intersecting: bool| {
			if !is_intersecting {
				return;
			}
			if let Some(observer) = observer.upgrade() {
				let disconnect = observer.borrow_mut().take();
				if let Some(disconnect) = disconnect {
					disconnect.dispose();
				}
			}
			mount.fire();
		})
	};

	let margin = if options.visible_root_margin.trim().is_empty() { DEFAULT_VISIBLE_ROOT_MARGIN } else { options.visible_root_margin.as_str() };
	let disconnect = platform.observe_intersection(host, margin, on_entry);
	*observer.borrow_mut() = Some(disconnect);
	Disposer::new(move || {
		let disconnect = observer.borrow_mut().take();
		if let Some(disconnect) = disconnect {
			disconnect.dispose();
		}
	})
}

fn schedule_hover(_platform: &Rc<dyn Platform>, host: &ElementRef, mount: &Rc<MountOnce>, _options: &ScheduleOptions) -> Disposer {
	bind_host_events(host, mount, &["mouseover", "focusin"])
}

fn schedule_event(_platform: &Rc<dyn Platform>, host: &ElementRef, mount: &Rc<MountOnce>, options: &ScheduleOptions) -> Disposer {
	if options.events.is_empty() {
		bind_host_events(host, mount, &[DEFAULT_MOUNT_EVENT])
	} else {
		bind_host_events(host, mount, options.events.as_slice())
	}
}

fn schedule_signal(_platform: &Rc<dyn Platform>, _host: &ElementRef, _mount: &Rc<MountOnce>, _options: &ScheduleOptions) -> Disposer {
	trace!("`signal` mounts are driven by their signal, not scheduled.");
	Disposer::noop()
}

/// One-shot listeners: whichever fires first removes all of them, then mounts.
fn bind_host_events(host: &ElementRef, mount: &Rc<MountOnce>, names: &[impl AsRef<str>]) -> Disposer {
	let listeners = Rc::new(RefCell::new(Vec::<Disposer>::new()));
	let weak_listeners: Weak<RefCell<Vec<Disposer>>> = Rc::downgrade(&listeners);

	let listener: Rc<dyn Fn()> = {
		let mount = Rc::clone(mount);
		Rc::new(move || {
			if let Some(listeners) = weak_listeners.upgrade() {
				let removed = core::mem::take(&mut *listeners.borrow_mut());
				for remove in removed {
					remove.dispose();
				}
			}
			mount.fire();
		})
	};

	for name in names {
		let remove = host.add_event_listener(name.as_ref(), Rc::clone(&listener));
		listeners.borrow_mut().push(remove);
	}

	Disposer::new(move || {
		let removed = core::mem::take(&mut *listeners.borrow_mut());
		for remove in removed {
			remove.dispose();
		}
	})
}
