use std::io::Write;
use std::sync::{Arc, Mutex};

use gfauto_core::logging::LogStack;

#[derive(Clone, Default)]
struct SharedSink(Arc<Mutex<Vec<u8>>>);

impl SharedSink {
    fn text(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for SharedSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn pushed_stream_receives_lines_until_guard_drops() {
    let stack = LogStack::new();
    let sink = SharedSink::default();
    {
        let _guard = stack.push(sink.clone());
        assert_eq!(stack.depth(), 1);
        stack.log("first");
    }
    assert_eq!(stack.depth(), 0);
    stack.log("second");

    assert_eq!(sink.text(), "first\n");
}

#[test]
fn nested_streams_both_receive_lines() {
    let stack = LogStack::new();
    let outer = SharedSink::default();
    let inner = SharedSink::default();
    let _outer_guard = stack.push(outer.clone());
    {
        let _inner_guard = stack.push(inner.clone());
        stack.log("both");
    }
    stack.log("outer only");

    assert_eq!(outer.text(), "both\nouter only\n");
    assert_eq!(inner.text(), "both\n");
}

#[test]
fn guard_pops_stream_when_unwinding() {
    let stack = LogStack::new();
    let sink = SharedSink::default();
    let stack_clone = stack.clone();
    let sink_clone = sink.clone();
    let result = std::panic::catch_unwind(move || {
        let _guard = stack_clone.push(sink_clone);
        stack_clone.log("before panic");
        panic!("boom");
    });
    assert!(result.is_err());
    assert_eq!(stack.depth(), 0);
    assert_eq!(sink.text(), "before panic\n");
}
