//! Fills the process-wide context name registry, so it runs in its own binary.
use flowgate::context_util::{self, MAX_CONTEXT_NAME_SIZE};
use flowgate::{ManualStatistics, ResourceWrapper, DEFAULT_CONTEXT_NAME, NULL_CONTEXT_NAME};
use std::sync::Arc;

#[test]
fn default_context_keeps_working_once_names_are_exhausted() {
    for i in 0..MAX_CONTEXT_NAME_SIZE {
        assert!(context_util::register_entrance_node(format!("ctx-{i}"), Arc::new(ManualStatistics::default())));
    }
    assert!(!context_util::register_entrance_node("one-too-many", Arc::new(ManualStatistics::default())));
    assert_eq!(context_util::entrance_node_count(), MAX_CONTEXT_NAME_SIZE);

    // Implicit entries still get a real default context.
    let mut e = context_util::entry(ResourceWrapper::inbound("implicit"), None);
    assert!(!e.is_inert());
    assert_eq!(context_util::context_name().as_deref(), Some(DEFAULT_CONTEXT_NAME));
    assert!(context_util::exit_entry(&mut e, 1, &[]).unwrap().root_exited);
    assert!(context_util::context_name().is_none());

    // A new explicit name falls back to the null context until released.
    context_util::enter("overflow", "").unwrap();
    assert_eq!(context_util::context_name().as_deref(), Some(NULL_CONTEXT_NAME));
    let mut inert = context_util::entry(ResourceWrapper::inbound("dropped"), None);
    assert!(inert.is_inert());
    assert!(context_util::exit_entry(&mut inert, 1, &[]).unwrap().noop);
    context_util::exit();
    assert!(context_util::context_name().is_none());

    let mut again = context_util::entry(ResourceWrapper::inbound("implicit"), None);
    assert!(!again.is_inert());
    context_util::exit_entry(&mut again, 1, &[]).unwrap();
}
