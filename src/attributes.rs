//! Host element attributes.
//!
//! These names and values are the wire format between markup-producing code (server rendering or
//! [`island`](`crate::island`)s) and the attribute-driven [`loader`](`crate::loader`).
//! They must stay bit-exact.

/// Presence flag identifying an island root.
pub const HOST: &str = "data-fict-react-host";
/// Locator of the island component (`module#export[...]`).
pub const LOCATOR: &str = "data-fict-react";
/// Percent-encoded JSON props payload.
pub const PROPS: &str = "data-fict-react-props";
/// Percent-encoded JSON array of additional prop names to treat as action callbacks.
pub const ACTION_PROPS: &str = "data-fict-react-action-props";
/// `"1"` if server-rendered markup is present and may be hydrated, `"0"` otherwise.
pub const SSR: &str = "data-fict-react-ssr";
/// Name of the [`ClientStrategy`](`crate::strategy::ClientStrategy`).
pub const CLIENT: &str = "data-fict-react-client";
/// Comma-separated mount event names for the `event` strategy.
pub const EVENT: &str = "data-fict-react-event";
/// Set to `"1"` while a rendering root is attached.
pub const MOUNTED: &str = "data-fict-react-mounted";
/// Identifier prefix handed to the rendering root.
pub const PREFIX: &str = "data-fict-react-prefix";

/// Attributes that are only read when a loader runtime is constructed.
///
/// Changing them on a tracked host is reported (in debug builds) and otherwise ignored.
pub const IMMUTABLE: [&str; 4] = [CLIENT, SSR, PREFIX, EVENT];

pub const DEFAULT_EXPORT: &str = "default";
pub const DEFAULT_VISIBLE_ROOT_MARGIN: &str = "200px";
pub const DEFAULT_TAG_NAME: &str = "div";
pub const DEFAULT_MOUNT_EVENT: &str = "click";

/// The build manifest global consulted by [`Platform::manifest_entry`](`crate::platform::Platform::manifest_entry`) in browsers.
pub const MANIFEST_GLOBAL: &str = "__FICT_MANIFEST__";
