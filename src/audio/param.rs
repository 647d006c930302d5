/// A scheduled automation segment. Times are audio-clock seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ParamEvent {
    SetValue { time: f64, value: f32 },
    LinearRamp { start: f64, end: f64, value: f32 },
    ExponentialRamp { start: f64, end: f64, value: f32 },
    /// Exponential approach toward `target`; never reaches it on its own.
    SetTarget { start: f64, target: f32, time_constant: f64 },
}

impl ParamEvent {
    fn start(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. } => time,
            ParamEvent::LinearRamp { start, .. }
            | ParamEvent::ExponentialRamp { start, .. }
            | ParamEvent::SetTarget { start, .. } => start,
        }
    }

    /// Time after which the event no longer changes the value on its own.
    fn own_end(&self) -> f64 {
        match *self {
            ParamEvent::SetValue { time, .. } => time,
            ParamEvent::LinearRamp { end, .. } | ParamEvent::ExponentialRamp { end, .. } => end,
            ParamEvent::SetTarget { .. } => f64::INFINITY,
        }
    }

    /// Value at `t` (≥ start) given the value `from` when the event began.
    fn eval(&self, from: f32, t: f64) -> f32 {
        match *self {
            ParamEvent::SetValue { value, .. } => value,
            ParamEvent::LinearRamp { start, end, value } => {
                if t >= end || end <= start {
                    value
                } else {
                    let frac = ((t - start) / (end - start)) as f32;
                    from + (value - from) * frac
                }
            }
            ParamEvent::ExponentialRamp { start, end, value } => {
                if t >= end || end <= start {
                    value
                } else {
                    let frac = ((t - start) / (end - start)) as f32;
                    if from > 0.0 && value > 0.0 {
                        from * (value / from).powf(frac)
                    } else {
                        // Exponential curves are undefined through zero.
                        from + (value - from) * frac
                    }
                }
            }
            ParamEvent::SetTarget { start, target, time_constant } => {
                if time_constant <= 0.0 {
                    return target;
                }
                let k = (-(t - start) / time_constant).exp() as f32;
                target + (from - target) * k
            }
        }
    }
}

/// Automatable parameter with Web-Audio style scheduling.
///
/// The value at any time is obtained by walking the time-ordered event list:
/// each event starts from the value left by the previous one and runs until
/// the next event begins. Results are clamped to `[min, max]`.
#[derive(Debug, Clone)]
pub struct AudioParam {
    base: f32,
    min: f32,
    max: f32,
    events: Vec<ParamEvent>,
}

impl AudioParam {
    pub fn new(value: f32, min: f32, max: f32) -> Self {
        Self {
            base: value.clamp(min, max),
            min,
            max,
            events: Vec::new(),
        }
    }

    pub fn min(&self) -> f32 {
        self.min
    }

    pub fn max(&self) -> f32 {
        self.max
    }

    pub fn value_at(&self, t: f64) -> f32 {
        self.eval_prefix(self.events.len(), t)
    }

    /// Jump to `value` now, discarding every scheduled event.
    pub fn set_value(&mut self, value: f32) {
        self.events.clear();
        self.base = self.clamp(value);
    }

    pub fn set_value_at_time(&mut self, value: f32, time: f64) {
        let value = self.clamp(value);
        self.insert(ParamEvent::SetValue { time, value });
    }

    /// Ramp linearly from whatever the value is at `start` to `value` at `end`.
    pub fn linear_ramp(&mut self, value: f32, start: f64, end: f64) {
        let value = self.clamp(value);
        self.insert(ParamEvent::LinearRamp { start, end: end.max(start), value });
    }

    /// Ramp exponentially to `value` at `end`. Falls back to linear when the
    /// curve would have to cross zero.
    pub fn exponential_ramp(&mut self, value: f32, start: f64, end: f64) {
        let value = self.clamp(value);
        self.insert(ParamEvent::ExponentialRamp { start, end: end.max(start), value });
    }

    /// Approach `target` from `start` with the given time constant.
    pub fn set_target_at_time(&mut self, target: f32, start: f64, time_constant: f64) {
        let target = self.clamp(target);
        self.insert(ParamEvent::SetTarget { start, target, time_constant });
    }

    /// Remove every event starting at or after `time`.
    pub fn cancel_scheduled_values(&mut self, time: f64) {
        self.events.retain(|ev| ev.start() < time);
    }

    /// Freeze the parameter at its actual value at `time` and drop later
    /// automation. Returns the held value.
    pub fn cancel_and_hold(&mut self, time: f64) -> f32 {
        let held = self.value_at(time);
        self.events.retain(|ev| ev.start() < time);
        self.events.push(ParamEvent::SetValue { time, value: held });
        held
    }

    /// True while some event is still shaping the value after `time`.
    pub fn has_automation_after(&self, time: f64) -> bool {
        (0..self.events.len()).any(|i| self.effective_end(i) > time)
    }

    pub fn has_events(&self) -> bool {
        !self.events.is_empty()
    }

    /// Fold every event that finished before `time` into the base value.
    pub fn prune_before(&mut self, time: f64) {
        let done = (0..self.events.len())
            .take_while(|&i| self.effective_end(i) <= time)
            .count();
        if done == 0 {
            return;
        }
        let settled_at = self.effective_end(done - 1);
        self.base = self.eval_prefix(done, settled_at);
        self.events.drain(..done);
    }

    // ── Internals ─────────────────────────────────────────────────────────

    fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    /// Keep events ordered by start time; equal starts keep insertion order.
    fn insert(&mut self, event: ParamEvent) {
        let at = self
            .events
            .partition_point(|ev| ev.start() <= event.start());
        self.events.insert(at, event);
    }

    fn effective_end(&self, i: usize) -> f64 {
        let own = self.events[i].own_end();
        match self.events.get(i + 1) {
            Some(next) => own.min(next.start()),
            None => own,
        }
    }

    fn eval_prefix(&self, count: usize, t: f64) -> f32 {
        let mut value = self.base;
        for i in 0..count {
            let ev = &self.events[i];
            if ev.start() > t {
                break;
            }
            let until = match self.events[..count].get(i + 1) {
                Some(next) if next.start() <= t => next.start(),
                _ => t,
            };
            value = ev.eval(value, until);
        }
        self.clamp(value)
    }
}
