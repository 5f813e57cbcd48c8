//! W3C trace context forwarded to the worker so its telemetry joins the
//! caller's trace.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceId(pub u128);

impl TraceId {
    pub fn as_hex(&self) -> String {
        format!("{:032x}", self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpanId(pub u64);

impl SpanId {
    pub fn as_hex(&self) -> String {
        format!("{:016x}", self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub sampled: bool,
}

impl TraceContext {
    /// Fresh trace with random, non-zero ids.
    pub fn root() -> Self {
        TraceContext {
            trace_id: TraceId(nonzero_u128()),
            span_id: SpanId(nonzero_u64()),
            sampled: true,
        }
    }

    /// Same trace, new span.
    pub fn child(&self) -> Self {
        TraceContext {
            trace_id: self.trace_id,
            span_id: SpanId(nonzero_u64()),
            sampled: self.sampled,
        }
    }

    pub fn to_traceparent(&self) -> String {
        let flags = if self.sampled { "01" } else { "00" };
        format!(
            "00-{}-{}-{}",
            self.trace_id.as_hex(),
            self.span_id.as_hex(),
            flags
        )
    }

    pub fn from_traceparent(s: &str) -> Option<Self> {
        let parts: Vec<&str> = s.trim().split('-').collect();
        if parts.len() != 4 || parts[0] != "00" {
            return None;
        }
        let (trace_hex, span_hex, flags) = (parts[1], parts[2], parts[3]);
        if trace_hex.len() != 32 || span_hex.len() != 16 || flags.len() != 2 {
            return None;
        }

        let trace_id = TraceId(u128::from_str_radix(trace_hex, 16).ok()?);
        let span_id = SpanId(u64::from_str_radix(span_hex, 16).ok()?);
        if trace_id.is_zero() || span_id.is_zero() {
            return None;
        }
        let flags = u8::from_str_radix(flags, 16).ok()?;

        Some(TraceContext {
            trace_id,
            span_id,
            sampled: flags & 0x01 != 0,
        })
    }
}

fn nonzero_u128() -> u128 {
    loop {
        let v: u128 = rand::random();
        if v != 0 {
            return v;
        }
    }
}

fn nonzero_u64() -> u64 {
    loop {
        let v: u64 = rand::random();
        if v != 0 {
            return v;
        }
    }
}
