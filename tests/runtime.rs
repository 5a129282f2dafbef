//! Facade-level smoke tests: an application wired the way a real
//! deployment would do it, exercised without sockets.

use arbor::{
	converter, handler, interceptor, service_fn, Context, ModuleDescriptor, ModuleRegistry,
	Outcome, Router, ServiceCaller,
};
use hyper::{Method, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;

async fn respond(router: &Router, method: Method, url: &str) -> (StatusCode, Value) {
	let mut ctx = Context::new(method, url);
	router.process(&mut ctx).await.unwrap();
	let parts = ctx.take_response();
	(
		parts.status,
		serde_json::from_slice(&parts.body).unwrap_or(Value::Null),
	)
}

fn shop_app() -> Router {
	let mut app = Router::new();
	app.get(
		"/goods/list",
		handler(|_ctx| {
			Box::pin(async { Ok(Outcome::Json(json!(["apples", "pears"]))) })
		}),
	)
	.unwrap();
	app.get(
		"/index",
		handler(|_ctx| Box::pin(async { Ok(Outcome::Text("shop home".to_string())) })),
	)
	.unwrap();
	app.get(
		"/404",
		handler(|_ctx| Box::pin(async { Ok(Outcome::Text("shop lost".to_string())) })),
	)
	.unwrap();
	app
}

#[tokio::test]
async fn mounted_application_with_shared_middleware() {
	let mut root = Router::new();
	root.convert(
		"/",
		&[],
		converter(|ctx| {
			Box::pin(async move {
				ctx.params
					.insert("trace".to_string(), vec!["on".to_string()]);
				Ok(())
			})
		}),
	)
	.unwrap();
	root.make_middle("/shop").unwrap();
	root.mount(&shop_app(), "/shop").unwrap();

	let (status, body) = respond(&root, Method::GET, "/shop").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["result"], "shop home");

	let (_, body) = respond(&root, Method::GET, "/shop/goods/list").await;
	assert_eq!(body["result"], json!(["apples", "pears"]));

	// unknown page inside the app falls back to its own 404
	let (_, body) = respond(&root, Method::GET, "/shop/goods/missing").await;
	assert_eq!(body["result"], "shop lost");
}

#[tokio::test]
async fn guarded_area_rejects_without_a_ticket() {
	let mut router = Router::new();
	router
		.intercept(
			"/admin",
			&[],
			interceptor(|ctx| {
				let allowed = ctx.query.get("ticket").map(String::as_str) == Some("ok");
				Box::pin(async move {
					if allowed {
						Ok(None)
					} else {
						Ok(Some("ticket required".to_string()))
					}
				})
			}),
		)
		.unwrap();
	router
		.get(
			"/admin/index",
			handler(|_ctx| Box::pin(async { Ok(Outcome::Text("console".to_string())) })),
		)
		.unwrap();

	let (status, body) = respond(&router, Method::GET, "/admin").await;
	assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
	assert_eq!(body["code"], 1);

	let (status, body) = respond(&router, Method::GET, "/admin?ticket=ok").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["result"], "console");
}

#[tokio::test]
async fn handlers_reach_sibling_modules_through_the_caller() {
	let mut registry = ModuleRegistry::new();
	registry.register(ModuleDescriptor::new("pricing").service(
		"quote",
		1,
		service_fn(|args| {
			Box::pin(async move {
				let base = args.first().and_then(Value::as_i64).unwrap_or(0);
				Ok(json!({ "price": base * 3 }))
			})
		}),
	));
	let caller = ServiceCaller::new(Arc::new(registry), None);

	let mut router = Router::new();
	router
		.get(
			"/shop/quote",
			handler(move |_ctx| {
				let caller = caller.clone();
				Box::pin(async move {
					let quote = caller.call("pricing", "quote", vec![json!(7)]).await?;
					Ok(Outcome::Json(quote))
				})
			}),
		)
		.unwrap();

	let (status, body) = respond(&router, Method::GET, "/shop/quote").await;
	assert_eq!(status, StatusCode::OK);
	assert_eq!(body["result"]["price"], 21);
}
