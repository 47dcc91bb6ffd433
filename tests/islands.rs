use core::{cell::Cell, time::Duration};
use islands_dom::{
	attributes::{ACTION_PROPS, CLIENT, EVENT, HOST, LOCATOR, MOUNTED, PREFIX, PROPS, SSR},
	island,
	install_loader,
	island::{IslandPropsInput, SignalSource},
	make_action_reference,
	module::Action,
	props::PropValue,
	reactify, reactify_by_locator,
	serialization::{decode_props, encode_action_props},
	testing::{deferred_loader, FakeDocument, FakeElement, FakePlatform, FakeRenderer, FakeScope, RenderEvent, TextComponent},
	ClientStrategy, Component, Context, IslandOptions, IslandProps, LoaderOptions, LocatorIslandOptions, Module, ModuleRegistry, Props,
};
use serde_json::json;
use std::rc::Rc;

fn counter() -> Component {
	TextComponent::component(|props| {
		let count = props.get("count").and_then(PropValue::as_data).map_or_else(String::new, ToString::to_string);
		format!("count={}", count)
	})
}

struct Fixture {
	platform: Rc<FakePlatform>,
	document: FakeDocument,
	renderer: Rc<FakeRenderer>,
	registry: ModuleRegistry,
	cx: Context,
}

fn fixture() -> Fixture {
	let platform = FakePlatform::new();
	let document = FakeDocument::new(&platform);
	let renderer = FakeRenderer::new();
	let cx = Context::new(platform.clone(), renderer.clone());
	let registry = ModuleRegistry::new().with("/islands/counter.js", Module::new().with_component("Counter", counter()));
	cx.set_island_module_loader(Some(registry.loader()));
	Fixture {
		platform,
		document,
		renderer,
		registry,
		cx,
	}
}

/// Props reading a shared counter, like a signal would.
fn counting(count: &Rc<Cell<i64>>) -> impl 'static + Fn() -> Props {
	let count = Rc::clone(count);
	move || Props::new().with("count", json!(count.get())).with("key", json!("ignored"))
}

impl Fixture {
	fn attach(&self, scope: &FakeScope, descriptor: &islands_dom::island::HostDescriptor) -> FakeElement {
		let host = self.document.render_host(&self.document.body(), descriptor);
		scope.mount();
		host
	}
}

#[test]
fn eager_island_mounts_and_follows_props() {
	let f = fixture();
	let count = Rc::new(Cell::new(1));
	let scope = FakeScope::new();
	let descriptor = reactify(&f.cx, counter(), IslandOptions::default()).render(&scope, counting(&count));

	assert_eq!(descriptor.tag_name, "div");
	assert_eq!(descriptor.attributes.keys().map(String::as_str).collect::<Vec<_>>(), vec![HOST, CLIENT, SSR]);
	assert_eq!(descriptor.attributes[CLIENT], "load");
	assert_eq!(descriptor.attributes[SSR], "1");
	assert!(descriptor.inner_html.is_none());

	let host = f.attach(&scope, &descriptor);
	assert!(f.renderer.events().is_empty());

	f.platform.run_until_stalled();
	assert_eq!(
		f.renderer.take_events(),
		vec![
			RenderEvent::Created { host: host.id(), identifier_prefix: None },
			RenderEvent::Rendered { host: host.id(), html: "count=1".to_owned() },
		]
	);
	assert_eq!(host.attribute(MOUNTED).as_deref(), Some("1"));
	assert!(!f.renderer.last_props(host.id()).expect("rendered").contains_key("key"));

	count.set(2);
	scope.rerun_effects();
	assert_eq!(f.renderer.take_events(), vec![RenderEvent::Rendered { host: host.id(), html: "count=2".to_owned() }]);

	scope.dispose();
	assert_eq!(f.renderer.take_events(), vec![RenderEvent::Unmounted { host: host.id() }]);
	assert_eq!(host.attribute(MOUNTED), None);
}

#[test]
fn server_render_then_hydrate() {
	let f = fixture();
	let count = Rc::new(Cell::new(7));
	let island = reactify(
		&f.cx,
		counter(),
		IslandOptions {
			identifier_prefix: Some("r1-".to_owned()),
			..IslandOptions::default()
		},
	);

	let server = island.render(&FakeScope::server(), counting(&count));
	assert_eq!(server.inner_html.as_deref(), Some("count=7"));
	assert_eq!(server.attributes[PREFIX], "r1-");

	let scope = FakeScope::new();
	let mut descriptor = island.render(&scope, counting(&count));
	descriptor.inner_html = server.inner_html.clone();
	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert_eq!(
		f.renderer.take_events(),
		vec![RenderEvent::Hydrated {
			host: host.id(),
			identifier_prefix: Some("r1-".to_owned()),
			html: "count=7".to_owned(),
		}]
	);
}

#[test]
fn client_only_islands_never_hydrate() {
	let f = fixture();
	let island = reactify(
		&f.cx,
		counter(),
		IslandOptions {
			client: ClientStrategy::Only,
			..IslandOptions::default()
		},
	);

	let server = island.render(&FakeScope::server(), Props::new);
	assert_eq!(server.attributes[SSR], "0");
	assert!(server.inner_html.is_none());

	let scope = FakeScope::new();
	let mut descriptor = island.render(&scope, Props::new);
	descriptor.inner_html = Some("stale".to_owned());
	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert!(matches!(f.renderer.events()[..], [RenderEvent::Created { .. }, RenderEvent::Rendered { .. }]));
	assert_eq!(host.inner_html(), "count=");
}

#[test]
fn signal_islands_mount_when_the_signal_turns_true() {
	let f = fixture();
	let flag = Rc::new(Cell::new(false));
	let island = reactify(
		&f.cx,
		counter(),
		IslandOptions {
			client: ClientStrategy::Signal,
			signal: Some(SignalSource::accessor({
				let flag = Rc::clone(&flag);
				move || flag.get()
			})),
			..IslandOptions::default()
		},
	);

	let scope = FakeScope::new();
	let descriptor = island.render(&scope, Props::new);
	let host = f.attach(&scope, &descriptor);
	f.platform.advance(Duration::from_secs(1));
	assert!(f.renderer.events().is_empty());

	flag.set(true);
	scope.rerun_effects();
	assert_eq!(
		f.renderer.take_events(),
		vec![
			RenderEvent::Created { host: host.id(), identifier_prefix: None },
			RenderEvent::Rendered { host: host.id(), html: "count=".to_owned() },
		]
	);

	scope.rerun_effects();
	assert_eq!(f.renderer.take_events(), vec![RenderEvent::Rendered { host: host.id(), html: "count=".to_owned() }]);
}

#[test]
fn constant_signal_mounts_on_mount() {
	let f = fixture();
	let island = reactify(
		&f.cx,
		counter(),
		IslandOptions {
			client: ClientStrategy::Signal,
			signal: Some(true.into()),
			..IslandOptions::default()
		},
	);
	let scope = FakeScope::new();
	let descriptor = island.render(&scope, Props::new);
	let host = f.attach(&scope, &descriptor);
	assert_eq!(host.inner_html(), "count=");
}

#[test]
fn event_islands_wait_for_their_events() {
	let f = fixture();
	let island = reactify(
		&f.cx,
		counter(),
		IslandOptions {
			client: ClientStrategy::Event,
			event: vec!["mouseenter, focus".to_owned(), r#"["focus","keydown"]"#.to_owned()],
			..IslandOptions::default()
		},
	);
	let scope = FakeScope::new();
	let descriptor = island.render(&scope, Props::new);
	assert_eq!(descriptor.attributes[EVENT], "mouseenter,focus,keydown");

	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert_eq!(host.listener_count(), 3);
	assert!(f.renderer.events().is_empty());

	host.dispatch_event("keydown");
	assert_eq!(host.inner_html(), "count=");
	assert_eq!(host.listener_count(), 0);
}

#[test]
fn cleanup_before_mount_cancels() {
	let f = fixture();
	let scope = FakeScope::new();
	let descriptor = reactify(&f.cx, counter(), IslandOptions::default()).render(&scope, Props::new);
	let host = f.attach(&scope, &descriptor);
	scope.dispose();
	f.platform.advance(Duration::from_secs(1));
	assert!(f.renderer.events().is_empty());
	assert_eq!(host.attribute(MOUNTED), None);
}

#[test]
fn cleanup_while_loading_never_mounts() {
	let f = fixture();
	let (modules, sender) = deferred_loader();
	f.cx.set_island_module_loader(Some(modules));
	let scope = FakeScope::new();
	let descriptor = lazy_counter(&f.cx).render(&scope, || Props::new().with("count", json!(1)));
	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert!(f.renderer.events().is_empty());

	scope.dispose();
	assert!(sender.send(Rc::new(Module::new().with_component("Counter", counter()))).is_ok());
	f.platform.run_until_stalled();
	assert!(f.renderer.events().is_empty());
	assert_eq!(host.attribute(MOUNTED), None);
	assert_eq!(host.inner_html(), "");
}

#[test]
fn tag_names_are_normalized() {
	let f = fixture();
	let scope = FakeScope::server();
	let blank = reactify(&f.cx, counter(), IslandOptions { tag_name: "  ".to_owned(), ..IslandOptions::default() }).render(&scope, Props::new);
	assert_eq!(blank.tag_name, "div");
	let section = reactify(&f.cx, counter(), IslandOptions { tag_name: " section ".to_owned(), ..IslandOptions::default() }).render(&scope, Props::new);
	assert_eq!(section.tag_name, "section");
}

fn lazy_counter(cx: &Context) -> islands_dom::island::IslandComponent {
	reactify_by_locator(
		cx,
		LocatorIslandOptions {
			module: "/islands/counter.js".to_owned(),
			export: Some("Counter".to_owned()),
			..LocatorIslandOptions::default()
		},
	)
}

#[test]
fn lazy_islands_load_and_sync_their_props_attribute() {
	let f = fixture();
	let count = Rc::new(Cell::new(1));
	let island = lazy_counter(&f.cx);
	assert_eq!(island.locator(), Some("/islands/counter.js#Counter"));

	let scope = FakeScope::new();
	let descriptor = island.render(&scope, counting(&count));
	assert_eq!(descriptor.attributes[LOCATOR], "/islands/counter.js#Counter");
	assert_eq!(decode_props(descriptor.attributes.get(PROPS).map(String::as_str)), Props::new().with("count", json!(1)));

	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert_eq!(host.inner_html(), "count=1");

	count.set(5);
	scope.rerun_effects();
	assert_eq!(host.inner_html(), "count=5");
	assert_eq!(decode_props(host.attribute(PROPS).as_deref()), Props::new().with("count", json!(5)));
}

#[test]
fn lazy_islands_render_nothing_on_the_server_without_a_component() {
	let f = fixture();
	let server = lazy_counter(&f.cx).render(&FakeScope::server(), Props::new);
	assert!(server.inner_html.is_none());

	let with_component = reactify_by_locator(
		&f.cx,
		LocatorIslandOptions {
			module: "/islands/counter.js".to_owned(),
			export: Some("Counter".to_owned()),
			component: Some(counter()),
			..LocatorIslandOptions::default()
		},
	);
	let server = with_component.render(&FakeScope::server(), || Props::new().with("count", json!(3)));
	assert_eq!(server.inner_html.as_deref(), Some("count=3"));
}

#[test]
fn lazy_islands_retry_after_cooldown() {
	let f = fixture();
	let island = reactify_by_locator(
		&f.cx,
		LocatorIslandOptions {
			module: "/islands/late.js".to_owned(),
			..LocatorIslandOptions::default()
		},
	);
	let scope = FakeScope::new();
	let descriptor = island.render(&scope, Props::new);
	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert_eq!(host.inner_html(), "");

	f.registry.register("/islands/late.js", Module::new().with_component("default", TextComponent::component(|_| "late".to_owned())));
	f.platform.advance(Duration::from_millis(100));
	assert_eq!(host.inner_html(), "late");
}

#[test]
fn island_and_loader_paths_are_independent() {
	let f = fixture();
	f.cx.reset_island_module_loader();
	f.cx.set_loader_module_loader(Some(f.registry.loader()));

	let scope = FakeScope::new();
	let descriptor = lazy_counter(&f.cx).render(&scope, Props::new);
	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert_eq!(host.inner_html(), "");
	assert!(f.renderer.events().is_empty());
}

#[test]
fn island_merges_children() {
	let f = fixture();
	let scope = FakeScope::new();
	let descriptor = island(
		&f.cx,
		&scope,
		IslandProps {
			component: counter(),
			props: IslandPropsInput::Static(Props::new().with("count", json!(2))),
			children: Some(PropValue::opaque("children")),
			options: IslandOptions::default(),
		},
	);
	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	let props = f.renderer.last_props(host.id()).expect("rendered");
	assert!(matches!(props.get("children"), Some(PropValue::Opaque(_))));
	assert_eq!(host.inner_html(), "count=2");

	let explicit = island(
		&f.cx,
		&FakeScope::server(),
		IslandProps {
			component: TextComponent::component(|props| props.get("children").and_then(PropValue::as_data).map_or_else(String::new, ToString::to_string)),
			props: IslandPropsInput::Accessor(Rc::new(|| Props::new().with("children", json!("own")))),
			children: Some(PropValue::data("ignored")),
			options: IslandOptions::default(),
		},
	);
	assert_eq!(explicit.inner_html.as_deref(), Some("\"own\""));
}

#[test]
fn action_props_are_materialized() {
	let f = fixture();
	let saved = Rc::new(Cell::new(0));
	let actions = ModuleRegistry::new().with(
		"/actions.js",
		Module::new().with_action("submit", {
			let saved = Rc::clone(&saved);
			Action::from_fn(move |args| saved.set(args.len()))
		}),
	);
	f.cx.set_action_module_loader(Some(actions.loader()));

	let scope = FakeScope::new();
	let descriptor = reactify(
		&f.cx,
		counter(),
		IslandOptions {
			action_props: vec![" submit ".to_owned(), String::new()],
			..IslandOptions::default()
		},
	)
	.render(&scope, || Props::new().with("submit", make_action_reference("/actions.js", Some("submit"))));
	assert_eq!(descriptor.attributes[ACTION_PROPS], encode_action_props(&["submit".to_owned()]));

	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	let props = f.renderer.last_props(host.id()).expect("rendered");
	let callback = props.get("submit").and_then(PropValue::as_callback).expect("materialized").clone();
	callback.call(vec![json!(1), json!(2)]);
	f.platform.run_until_stalled();
	assert_eq!(saved.get(), 2);

	scope.rerun_effects();
	let rerendered = f.renderer.last_props(host.id()).expect("rendered");
	assert!(rerendered.get("submit").and_then(PropValue::as_callback).is_some_and(|again| again.ptr_eq(&callback)));
}

#[test]
fn loaders_leave_programmatic_hosts_alone() {
	let f = fixture();
	f.cx.set_loader_module_loader(Some(f.registry.loader()));
	let loader = install_loader(&f.cx, LoaderOptions::default());

	let count = Rc::new(Cell::new(1));
	let scope = FakeScope::new();
	let descriptor = lazy_counter(&f.cx).render(&scope, counting(&count));
	let host = f.attach(&scope, &descriptor);
	f.platform.run_until_stalled();
	assert!(f.cx.is_host_claimed(host.id()));
	assert!(!loader.is_tracking(&host.to_ref()));
	assert_eq!(
		f.renderer.take_events(),
		vec![
			RenderEvent::Created { host: host.id(), identifier_prefix: None },
			RenderEvent::Rendered { host: host.id(), html: "count=1".to_owned() },
		]
	);

	// Props attribute updates come from the island itself.
	count.set(2);
	scope.rerun_effects();
	f.platform.run_until_stalled();
	assert_eq!(f.renderer.take_events(), vec![RenderEvent::Rendered { host: host.id(), html: "count=2".to_owned() }]);
	assert!(!loader.is_tracking(&host.to_ref()));

	scope.dispose();
	assert!(!f.cx.is_host_claimed(host.id()));
}

#[test]
fn hosts_claimed_after_discovery_are_handed_over() {
	let f = fixture();
	f.cx.set_loader_module_loader(Some(f.registry.loader()));

	let scope = FakeScope::new();
	let descriptor = lazy_counter(&f.cx).render(&scope, || Props::new().with("count", json!(1)));
	let host = f.document.render_host(&f.document.body(), &descriptor);
	let loader = install_loader(&f.cx, LoaderOptions::default());
	assert!(loader.is_tracking(&host.to_ref()));

	scope.mount();
	f.platform.run_until_stalled();
	assert!(!loader.is_tracking(&host.to_ref()));
	assert_eq!(
		f.renderer.take_events(),
		vec![
			RenderEvent::Created { host: host.id(), identifier_prefix: None },
			RenderEvent::Rendered { host: host.id(), html: "count=1".to_owned() },
		]
	);
	assert_eq!(host.attribute(MOUNTED).as_deref(), Some("1"));
}
