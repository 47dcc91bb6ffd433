use core::{cell::RefCell, time::Duration};
use futures::{future, FutureExt as _};
use hashbrown::HashMap;
use islands_dom::{
	action::materialize,
	invoke,
	module::{Action, ModuleLoader},
	props::PropValue,
	testing::{FakePlatform, FakeRenderer},
	Context, Error, LoadKind, Module, ModuleRegistry, Props,
};
use serde_json::{json, Value};
use std::rc::Rc;

fn recorder() -> (Rc<RefCell<Vec<Vec<Value>>>>, Action) {
	let calls = Rc::new(RefCell::new(Vec::new()));
	let action = Action::from_fn({
		let calls = Rc::clone(&calls);
		move |args| calls.borrow_mut().push(args)
	});
	(calls, action)
}

fn setup() -> (Rc<FakePlatform>, Context) {
	let platform = FakePlatform::new();
	let cx = Context::new(platform.clone(), FakeRenderer::new());
	(platform, cx)
}

#[test]
fn invokes_registered_actions() {
	let (platform, cx) = setup();
	let (calls, save) = recorder();
	let registry = ModuleRegistry::new().with("/actions.js", Module::new().with_action("save", save).with_value("VERSION", json!(2)));
	cx.set_action_module_loader(Some(registry.loader()));

	let result = platform.block_on({
		let cx = cx.clone();
		async move { invoke(&cx, "/actions.js#save", vec![json!("a")]).await }
	});
	assert_eq!(result, Ok(()));
	assert_eq!(*calls.borrow(), vec![vec![json!("a")]]);

	let result = platform.block_on({
		let cx = cx.clone();
		async move { invoke(&cx, "/actions.js#VERSION", vec![]).await }
	});
	assert!(matches!(result, Err(Error::NotCallable { kind: LoadKind::Action, .. })));

	let result = platform.block_on(async move { invoke(&cx, "#save", vec![]).await });
	assert!(matches!(result, Err(Error::MissingModuleUrl { kind: LoadKind::Action, .. })));
}

#[test]
fn action_errors_are_reported() {
	let (platform, cx) = setup();
	let failing = Action::new(|_| future::ready(Err("nope".to_owned())).boxed_local());
	cx.set_action_module_loader(Some(ModuleRegistry::new().with("/actions.js", Module::new().with_action("default", failing)).loader()));

	let result = platform.block_on(async move { invoke(&cx, "/actions.js", vec![]).await });
	assert_eq!(
		result,
		Err(Error::Action {
			locator: "/actions.js".to_owned(),
			reason: "nope".to_owned(),
		})
	);
}

#[test]
fn failed_action_modules_cool_down() {
	let (platform, cx) = setup();
	let (calls, run) = recorder();
	let registry = ModuleRegistry::new();
	cx.set_action_module_loader(Some(registry.loader()));

	let attempt = |cx: &Context| {
		let cx = cx.clone();
		platform.block_on(async move { invoke(&cx, "/late.js#run", vec![]).await })
	};

	assert!(matches!(attempt(&cx), Err(Error::Load { .. })));
	registry.register("/late.js", Module::new().with_action("run", run));
	assert!(matches!(attempt(&cx), Err(Error::Cooldown { failures: 1, .. })));

	platform.advance(Duration::from_millis(110));
	assert_eq!(attempt(&cx), Ok(()));
	assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn concurrent_invocations_share_one_load() {
	let (platform, cx) = setup();
	let (calls, run) = recorder();
	let loads = Rc::new(RefCell::new(0));
	let module = Rc::new(Module::new().with_action("run", run));
	let loader: ModuleLoader = Rc::new({
		let loads = Rc::clone(&loads);
		move |_: &str| {
			*loads.borrow_mut() += 1;
			future::ready(Ok::<_, Error>(Rc::clone(&module))).boxed_local()
		}
	});
	cx.set_action_module_loader(Some(loader));

	let props = Rc::new(Props::new().with("onRun", json!({ "__fictReactAction": "/a.js#run" })));
	let materialized = materialize(&cx, &props, &[]);
	let callback = materialized.get("onRun").and_then(PropValue::as_callback).expect("materialized").clone();
	callback.call(vec![json!(1)]);
	callback.call(vec![json!(2)]);
	platform.run_until_stalled();

	assert_eq!(*loads.borrow(), 1);
	let mut calls = calls.borrow().clone();
	calls.sort_by_key(|args| args[0].as_i64());
	assert_eq!(calls, vec![vec![json!(1)], vec![json!(2)]]);
}

#[test]
fn module_url_policy() {
	let (platform, cx) = setup();
	let (calls, run) = recorder();
	cx.set_action_module_loader(Some(ModuleRegistry::new().with("https://cdn.example/actions.js", Module::new().with_action("run", run)).loader()));

	assert!(cx.is_module_url_allowed("/actions.js", LoadKind::Action));
	assert!(!cx.is_module_url_allowed("https://cdn.example/actions.js", LoadKind::Action));
	assert!(!cx.is_module_url_allowed("data:text/javascript,export default 1", LoadKind::Component));
	assert_eq!(
		cx.assert_module_url_allowed("https://cdn.example/actions.js", LoadKind::Action),
		Err(Error::Blocked {
			kind: LoadKind::Action,
			url: "https://cdn.example/actions.js".to_owned(),
		})
	);

	let result = platform.block_on({
		let cx = cx.clone();
		async move { invoke(&cx, "https://cdn.example/actions.js#run", vec![]).await }
	});
	assert!(matches!(result, Err(Error::Blocked { .. })));

	cx.set_module_url_policy(Some(Rc::new(|url: &str, kind: LoadKind| kind == LoadKind::Action && url.starts_with("https://cdn.example/"))));
	let result = platform.block_on({
		let cx = cx.clone();
		async move { invoke(&cx, "https://cdn.example/actions.js#run", vec![]).await }
	});
	assert_eq!(result, Ok(()));
	assert_eq!(calls.borrow().len(), 1);

	cx.reset();
	assert!(!cx.is_module_url_allowed("https://cdn.example/actions.js", LoadKind::Action));

	platform.set_location(None);
	assert!(cx.is_module_url_allowed("https://cdn.example/actions.js", LoadKind::Action));
}

#[test]
fn manifest_mapping() {
	let (platform, cx) = setup();
	assert_eq!(cx.resolve_module_url("/src/actions.ts"), "/src/actions.ts");

	platform.set_manifest_entry("/src/actions.ts", "/assets/actions-1f2e.js");
	platform.set_manifest_entry("/src/empty.ts", "");
	assert_eq!(cx.resolve_module_url("/src/actions.ts"), "/assets/actions-1f2e.js");
	assert_eq!(cx.resolve_module_url("/src/empty.ts"), "/src/empty.ts");

	let mut manifest = HashMap::new();
	manifest.insert("/src/other.ts".to_owned(), "/assets/other.js".to_owned());
	cx.set_manifest(Some(manifest));
	assert_eq!(cx.resolve_module_url("/src/actions.ts"), "/src/actions.ts");
	assert_eq!(cx.resolve_module_url("/src/other.ts"), "/assets/other.js");

	let (calls, run) = recorder();
	cx.set_action_module_loader(Some(ModuleRegistry::new().with("/assets/other.js", Module::new().with_action("run", run)).loader()));
	let result = platform.block_on({
		let cx = cx.clone();
		async move { invoke(&cx, "/src/other.ts#run", vec![]).await }
	});
	assert_eq!(result, Ok(()));
	assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn replacing_the_action_loader_drops_cached_handlers() {
	let (_platform, cx) = setup();
	let props = Rc::new(Props::new().with("onRun", islands_dom::make_action_reference("/a.js", Some("run"))));
	let first = materialize(&cx, &props, &[]).get("onRun").and_then(PropValue::as_callback).cloned().expect("materialized");
	let again = materialize(&cx, &props, &[]).get("onRun").and_then(PropValue::as_callback).cloned().expect("materialized");
	assert!(first.ptr_eq(&again));

	cx.reset_action_caches();
	let fresh = materialize(&cx, &props, &[]).get("onRun").and_then(PropValue::as_callback).cloned().expect("materialized");
	assert!(!first.ptr_eq(&fresh));
}
