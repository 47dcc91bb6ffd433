//! Rendering roots, the seam between island lifecycles and the component backend.

use crate::{
	attributes::SSR,
	module::Component,
	platform::ElementRef,
	props::Props,
};
use core::fmt;
use std::rc::Rc;
use tracing::{trace_span, warn};

/// A component together with the props to render it with.
#[derive(Debug, Clone)]
pub struct ComponentElement {
	pub component: Component,
	pub props: Rc<Props>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootOptions {
	/// Prefix for identifiers the backend generates, to keep several roots on one page apart.
	pub identifier_prefix: Option<String>,
}

/// A mounted component tree.
pub trait Root {
	fn render(&mut self, element: ComponentElement);
	fn unmount(&mut self);
}

/// A component backend.
pub trait Renderer: fmt::Debug {
	/// Creates an empty root in `host`. Nothing is rendered until [`Root::render`] is called.
	fn create_root(&self, host: &ElementRef, options: &RootOptions) -> Box<dyn Root>;

	/// Adopts the server-rendered markup already inside `host`.
	fn hydrate_root(&self, host: &ElementRef, element: ComponentElement, options: &RootOptions) -> Box<dyn Root>;

	/// Renders `element` to markup, for server-side rendering.
	fn render_to_string(&self, element: &ComponentElement) -> String;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountOptions {
	pub hydrate: bool,
	pub identifier_prefix: Option<String>,
}

/// Whether `host` carries server-rendered markup that can be hydrated.
#[must_use]
pub fn has_hydratable_content(host: &ElementRef) -> bool {
	host.attribute(SSR).is_some_and(|ssr| ssr != "0") && host.has_rendered_content()
}

/// A [`Root`] that can be unmounted any number of times.
pub struct MountedRoot {
	root: Option<Box<dyn Root>>,
	hydrated: bool,
}

impl fmt::Debug for MountedRoot {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MountedRoot").field("mounted", &self.root.is_some()).field("hydrated", &self.hydrated).finish()
	}
}

impl MountedRoot {
	pub fn render(&mut self, element: ComponentElement) {
		match &mut self.root {
			Some(root) => root.render(element),
			None => warn!("Tried to render into an unmounted root."),
		}
	}

	pub fn unmount(&mut self) {
		if let Some(mut root) = self.root.take() {
			root.unmount();
		}
	}

	#[must_use]
	pub fn is_mounted(&self) -> bool {
		self.root.is_some()
	}

	/// Whether the root adopted server-rendered markup rather than starting out empty.
	#[must_use]
	pub fn hydrated(&self) -> bool {
		self.hydrated
	}
}

/// Mounts `element` into `host`.
///
/// Hydrates only if requested **and** [`has_hydratable_content`]. Hydrating an empty or
/// client-only host would fail as a mismatch, so a fresh root is created and rendered instead.
pub fn mount_root(renderer: &dyn Renderer, host: &ElementRef, element: ComponentElement, options: &MountOptions) -> MountedRoot {
	let root_options = RootOptions {
		identifier_prefix: options.identifier_prefix.clone().filter(|prefix| !prefix.is_empty()),
	};

	let hydrate = options.hydrate && has_hydratable_content(host);
	let _span = trace_span!("mount_root", host = ?host.id(), hydrate).entered();
	if hydrate {
		return MountedRoot {
			root: Some(renderer.hydrate_root(host, element, &root_options)),
			hydrated: true,
		};
	}

	let mut root = renderer.create_root(host, &root_options);
	root.render(element);
	MountedRoot { root: Some(root), hydrated: false }
}
