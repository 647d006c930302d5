/// Longest echo the delay line can hold.
pub const MAX_DELAY_SECS: f32 = 2.0;

/// Stereo feedback delay line. Delay time, feedback and wet level are passed
/// per frame so they can follow automation.
pub struct FeedbackDelay {
    sample_rate: f32,
    buffer_l: Vec<f32>,
    buffer_r: Vec<f32>,
    write_pos: usize,
}

impl FeedbackDelay {
    pub fn new(sample_rate: f32) -> Self {
        let len = ((sample_rate * MAX_DELAY_SECS) as usize).max(2);
        Self {
            sample_rate,
            buffer_l: vec![0.0; len],
            buffer_r: vec![0.0; len],
            write_pos: 0,
        }
    }

    /// Run one frame and return the wet signal only.
    #[inline]
    pub fn process(
        &mut self,
        left: f32,
        right: f32,
        delay_secs: f32,
        feedback: f32,
        wet: f32,
    ) -> (f32, f32) {
        let len = self.buffer_l.len();
        let delay = ((delay_secs * self.sample_rate) as usize).clamp(1, len - 1);
        let read_pos = (self.write_pos + len - delay) % len;
        let (dl, dr) = (self.buffer_l[read_pos], self.buffer_r[read_pos]);

        let fb = feedback.clamp(0.0, 0.95);
        self.buffer_l[self.write_pos] = left + dl * fb;
        self.buffer_r[self.write_pos] = right + dr * fb;
        self.write_pos = (self.write_pos + 1) % len;

        (dl * wet, dr * wet)
    }

    /// Flush the echo tail.
    pub fn clear(&mut self) {
        self.buffer_l.fill(0.0);
        self.buffer_r.fill(0.0);
        self.write_pos = 0;
    }
}
