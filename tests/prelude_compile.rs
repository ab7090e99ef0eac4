//! Compile-time prelude coverage test.
use flowgate::prelude::*;
use std::sync::Arc;
use tower::service_fn;
use tower_layer::Layer;
use tower_service::Service;

#[tokio::test]
async fn prelude_reexports_core_types() {
    let controller = ShapingConfig::Threshold { count: 10.0 }.build().expect("valid config");
    assert_eq!(ShapingConfig::warm_up(10.0, 5).behavior(), ControlBehavior::WarmUp);
    let stats = Arc::new(ManualStatistics::default());

    let mut svc = ShapingLayer::new("prelude", controller, stats)
        .layer(service_fn(|_req: ()| async { Ok::<_, std::io::Error>(()) }));
    svc.call(()).await.expect("service call failed");

    let mut entry = context_util::entry(ResourceWrapper::inbound("prelude"), None);
    context_util::exit_entry(&mut entry, 1, &[]).expect("in-order exit");
}
