//! Developer event log: structured JSON lines on the `memopt::dev` target, with an
//! optional thread-local sink so tests can assert on them without a global logger.

use std::cell::RefCell;

pub const DEV_TARGET: &str = "memopt::dev";

thread_local! {
    static TL_SINK: RefCell<Option<Vec<String>>> = const { RefCell::new(None) };
}

/// Disables the thread-local sink on drop.
pub struct DevSinkGuard;

impl Drop for DevSinkGuard {
    fn drop(&mut self) {
        TL_SINK.with(|s| *s.borrow_mut() = None);
    }
}

/// Start capturing events emitted on the current thread.
pub fn enable_thread_sink() -> DevSinkGuard {
    TL_SINK.with(|s| *s.borrow_mut() = Some(Vec::new()));
    DevSinkGuard
}

pub fn record(msg: &str) {
    TL_SINK.with(|s| {
        if let Some(buf) = s.borrow_mut().as_mut() {
            buf.push(msg.to_owned());
        }
    });
}

/// Take the captured events for the current thread. Empty when capture is off.
pub fn drain() -> Vec<String> {
    TL_SINK.with(|s| s.borrow_mut().as_mut().map(std::mem::take).unwrap_or_default())
}

/// Emit a developer event: `dev_event!("component", "op", key = value, ...)`.
#[macro_export]
macro_rules! dev_event {
    ($component:expr, $op:expr $(, $key:ident = $val:expr)* $(,)?) => {{
        let mut __s = format!("{{\"component\":\"{}\",\"op\":\"{}\"", $component, $op);
        $( __s.push_str(&format!(",\"{}\":{}", stringify!($key), $val)); )*
        __s.push('}');
        $crate::utils::devlog::record(&__s);
        log::log!(target: $crate::utils::devlog::DEV_TARGET, log::Level::Trace, "{}", __s);
    }};
}
