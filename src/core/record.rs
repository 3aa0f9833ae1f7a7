//! Allocation records.
//!
//! One record describes a single sampled allocation: what was allocated,
//! how large it was, which thread allocated it, and the captured call stack.
//! Records are immutable once built; equality and hashing use the object id
//! alone so a record can stand in for the object it describes.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::core::{current_thread_id, current_thread_name, now_millis};

/// Captured stacks are truncated to this depth.
pub const MAX_STACK_FRAMES: usize = 20;

/// A single frame of the allocation call stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackFrame {
    pub declaring_class: String,
    pub method: String,
    pub file: String,
    pub line: u32,
}

impl StackFrame {
    pub fn new(
        declaring_class: impl Into<String>,
        method: impl Into<String>,
        file: impl Into<String>,
        line: u32,
    ) -> Self {
        Self {
            declaring_class: declaring_class.into(),
            method: method.into(),
            file: file.into(),
            line,
        }
    }

    /// Parse the agent's `class.method(file:line)` wire form. Frames that do
    /// not parse are replaced with an "unknown" frame rather than rejected.
    pub fn parse(text: &str) -> Self {
        fn try_parse(text: &str) -> Option<StackFrame> {
            let open = text.find('(')?;
            let close = text.rfind(')')?;
            if close <= open {
                return None;
            }
            let qualified = &text[..open];
            let location = &text[open + 1..close];
            let dot = qualified.rfind('.')?;
            let (file, line) = match location.rsplit_once(':') {
                Some((file, line)) => (file.to_string(), line.parse().ok()?),
                None => (location.to_string(), 0),
            };
            Some(StackFrame {
                declaring_class: qualified[..dot].to_string(),
                method: qualified[dot + 1..].to_string(),
                file,
                line,
            })
        }

        try_parse(text).unwrap_or_else(|| StackFrame::new("unknown", "unknown", "unknown", 0))
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}({}:{})",
            self.declaring_class, self.method, self.file, self.line
        )
    }
}

/// Immutable description of one allocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationRecord {
    object_id: u64,
    class_name: String,
    size: u64,
    timestamp_ms: u64,
    thread_id: u64,
    thread_name: String,
    frames: Vec<StackFrame>,
    allocation_site: String,
}

impl AllocationRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        object_id: u64,
        class_name: impl Into<String>,
        size: u64,
        timestamp_ms: u64,
        thread_id: u64,
        thread_name: impl Into<String>,
        mut frames: Vec<StackFrame>,
        framework_prefixes: &[String],
    ) -> Self {
        frames.truncate(MAX_STACK_FRAMES);
        let allocation_site = derive_allocation_site(&frames, framework_prefixes);
        Self {
            object_id,
            class_name: class_name.into(),
            size,
            timestamp_ms,
            thread_id,
            thread_name: thread_name.into(),
            frames,
            allocation_site,
        }
    }

    pub fn builder() -> RecordBuilder {
        RecordBuilder::new()
    }

    pub fn object_id(&self) -> u64 {
        self.object_id
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// The callsite this allocation is attributed to, serialized as
    /// `class.method(file:line)`.
    pub fn allocation_site(&self) -> &str {
        &self.allocation_site
    }

    /// Milliseconds elapsed since the allocation.
    pub fn age_ms(&self) -> u64 {
        now_millis().saturating_sub(self.timestamp_ms)
    }

    pub fn age_string(&self) -> String {
        format_duration(self.age_ms())
    }

    /// The full stack rendered one frame per line.
    pub fn stack_trace_string(&self) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            out.push_str("\tat ");
            out.push_str(&frame.to_string());
            out.push('\n');
        }
        out
    }
}

impl PartialEq for AllocationRecord {
    fn eq(&self, other: &Self) -> bool {
        self.object_id == other.object_id
    }
}

impl Eq for AllocationRecord {}

impl Hash for AllocationRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object_id.hash(state);
    }
}

impl fmt::Display for AllocationRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AllocationRecord{{obj={}, class={}, size={}, site={}, age={}}}",
            self.object_id,
            self.class_name,
            self.size,
            self.allocation_site,
            self.age_string()
        )
    }
}

/// First frame outside the framework prefixes wins; fall back to the top
/// frame, then to "unknown" for an empty capture.
fn derive_allocation_site(frames: &[StackFrame], framework_prefixes: &[String]) -> String {
    for frame in frames {
        if !framework_prefixes
            .iter()
            .any(|prefix| frame.declaring_class.starts_with(prefix.as_str()))
        {
            return frame.to_string();
        }
    }
    match frames.first() {
        Some(frame) => frame.to_string(),
        None => "unknown".to_string(),
    }
}

/// Render a millisecond duration the way the dashboards expect it.
pub fn format_duration(millis: u64) -> String {
    if millis < 1_000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.1}s", millis as f64 / 1_000.0)
    } else if millis < 3_600_000 {
        format!("{:.1}m", millis as f64 / 60_000.0)
    } else {
        format!("{:.1}h", millis as f64 / 3_600_000.0)
    }
}

/// Fluent construction for the instrumentation path, where record fields
/// arrive piecemeal. Timestamp and thread context default to the caller's.
#[derive(Debug)]
pub struct RecordBuilder {
    object_id: u64,
    class_name: String,
    size: u64,
    timestamp_ms: u64,
    thread_id: u64,
    thread_name: String,
    frames: Vec<StackFrame>,
    framework_prefixes: Vec<String>,
}

impl RecordBuilder {
    fn new() -> Self {
        Self {
            object_id: 0,
            class_name: String::new(),
            size: 0,
            timestamp_ms: now_millis(),
            thread_id: current_thread_id(),
            thread_name: current_thread_name(),
            frames: Vec::new(),
            framework_prefixes: crate::config::DEFAULT_FRAMEWORK_PREFIXES
                .iter()
                .map(|p| p.to_string())
                .collect(),
        }
    }

    pub fn object_id(mut self, object_id: u64) -> Self {
        self.object_id = object_id;
        self
    }

    pub fn class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = class_name.into();
        self
    }

    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn timestamp_ms(mut self, timestamp_ms: u64) -> Self {
        self.timestamp_ms = timestamp_ms;
        self
    }

    pub fn thread_id(mut self, thread_id: u64) -> Self {
        self.thread_id = thread_id;
        self
    }

    pub fn thread_name(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = thread_name.into();
        self
    }

    pub fn frames(mut self, frames: Vec<StackFrame>) -> Self {
        self.frames = frames;
        self
    }

    pub fn frame(mut self, frame: StackFrame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn framework_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.framework_prefixes = prefixes;
        self
    }

    pub fn build(self) -> AllocationRecord {
        AllocationRecord::new(
            self.object_id,
            self.class_name,
            self.size,
            self.timestamp_ms,
            self.thread_id,
            self.thread_name,
            self.frames,
            &self.framework_prefixes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes() -> Vec<String> {
        crate::config::DEFAULT_FRAMEWORK_PREFIXES
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    #[test]
    fn site_skips_framework_frames() {
        let frames = vec![
            StackFrame::new("java.lang.String", "intern", "String.java", 120),
            StackFrame::new("sun.misc.Unsafe", "allocateInstance", "Unsafe.java", 44),
            StackFrame::new("com.acme.Cache", "put", "Cache.java", 88),
        ];
        let record =
            AllocationRecord::new(1, "java.lang.String", 24, 1_000, 7, "main", frames, &prefixes());
        assert_eq!(record.allocation_site(), "com.acme.Cache.put(Cache.java:88)");
    }

    #[test]
    fn site_falls_back_to_first_frame() {
        let frames = vec![StackFrame::new(
            "java.lang.Thread",
            "run",
            "Thread.java",
            833,
        )];
        let record = AllocationRecord::new(2, "X", 8, 1_000, 7, "main", frames, &prefixes());
        assert_eq!(record.allocation_site(), "java.lang.Thread.run(Thread.java:833)");
    }

    #[test]
    fn site_unknown_for_empty_stack() {
        let record = AllocationRecord::new(3, "X", 8, 1_000, 7, "main", vec![], &prefixes());
        assert_eq!(record.allocation_site(), "unknown");
    }

    #[test]
    fn frames_truncated_to_limit() {
        let frames: Vec<StackFrame> = (0..40)
            .map(|i| StackFrame::new("com.acme.Deep", "call", "Deep.java", i))
            .collect();
        let record = AllocationRecord::new(4, "X", 8, 1_000, 7, "main", frames, &prefixes());
        assert_eq!(record.frames().len(), MAX_STACK_FRAMES);
    }

    #[test]
    fn equality_is_by_object_id() {
        let a = AllocationRecord::new(5, "A", 8, 1_000, 7, "main", vec![], &prefixes());
        let b = AllocationRecord::new(5, "B", 99, 2_000, 8, "worker", vec![], &prefixes());
        assert_eq!(a, b);
    }

    #[test]
    fn frame_parse_round_trip() {
        let frame = StackFrame::parse("com.acme.Cache.put(Cache.java:88)");
        assert_eq!(frame.declaring_class, "com.acme.Cache");
        assert_eq!(frame.method, "put");
        assert_eq!(frame.file, "Cache.java");
        assert_eq!(frame.line, 88);
        assert_eq!(frame.to_string(), "com.acme.Cache.put(Cache.java:88)");
    }

    #[test]
    fn unparseable_frame_becomes_unknown() {
        let frame = StackFrame::parse("garbage");
        assert_eq!(frame.declaring_class, "unknown");
    }

    #[test]
    fn duration_formatting() {
        assert_eq!(format_duration(340), "340ms");
        assert_eq!(format_duration(2_500), "2.5s");
        assert_eq!(format_duration(192_000), "3.2m");
        assert_eq!(format_duration(3_960_000), "1.1h");
    }

    #[test]
    fn builder_defaults_to_current_context() {
        let record = AllocationRecord::builder()
            .object_id(9)
            .class_name("com.acme.Widget")
            .size(64)
            .build();
        assert_eq!(record.object_id(), 9);
        assert!(record.timestamp_ms() > 0);
    }
}
