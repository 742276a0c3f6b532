//! Field state and the line-oriented command interpreter that drives it.
//!
//! Script format: one `COMMAND ARGUMENT` per line. Commands are matched
//! case-insensitively; blank lines and lines starting with `#` are skipped and
//! unknown commands are ignored. Arguments are read by leading numeric prefix,
//! so `DESTINY 0.5 please` sets 0.5 and `DESTINY soon` sets 0.

use serde::{Deserialize, Serialize};

use crate::config::{clamp01, DEFAULT_FOCUS, DEFAULT_SPREAD, FIELD_SNAPSHOT_LEN};

const PROPHECY_RANGE: (i32, i32) = (1, 64);
const TUNNEL_SKIP_RANGE: (i32, i32) = (1, 24);
const JUMP_LIMIT: i32 = 1000;

/// Shared control state read by the lung and the sampler around it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldState {
    /// Prediction horizon in steps, [1, 64].
    pub prophecy: i32,
    pub destiny: f32,
    pub wormhole: f32,
    pub calendar_drift: f32,

    pub attend_focus: f32,
    pub attend_spread: f32,

    pub tunnel_threshold: f32,
    pub tunnel_chance: f32,
    /// [1, 24].
    pub tunnel_skip_max: i32,

    /// Accumulated relative jump, [-1000, 1000]; cleared by `take_jump`.
    pub pending_jump: i32,

    pub pain: f32,
    pub tension: f32,
    pub dissonance: f32,
}

impl Default for FieldState {
    fn default() -> Self {
        Self {
            prophecy: 7,
            destiny: 0.35,
            wormhole: 0.12,
            calendar_drift: 11.0,
            attend_focus: DEFAULT_FOCUS,
            attend_spread: DEFAULT_SPREAD,
            tunnel_threshold: 0.55,
            tunnel_chance: 0.22,
            tunnel_skip_max: 7,
            pending_jump: 0,
            pain: 0.0,
            tension: 0.0,
            dissonance: 0.0,
        }
    }
}

impl FieldState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run a script and return how many recognised commands it applied.
    pub fn exec(&mut self, script: &str) -> usize {
        let mut applied = 0;
        for line in script.split('\n') {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (command, arg) = match line.split_once(char::is_whitespace) {
                Some((c, rest)) => (c, rest.trim_start()),
                None => (line, ""),
            };
            if self.apply(&command.to_ascii_uppercase(), arg) {
                applied += 1;
            } else {
                tracing::trace!(command, "ignoring unknown command");
            }
        }
        applied
    }

    fn apply(&mut self, command: &str, arg: &str) -> bool {
        match command {
            "PROPHECY" => self.prophecy = leading_i32(arg).clamp(PROPHECY_RANGE.0, PROPHECY_RANGE.1),
            "DESTINY" => self.destiny = clamp01(leading_f32(arg)),
            "WORMHOLE" => self.wormhole = clamp01(leading_f32(arg)),
            "CALENDAR_DRIFT" => self.calendar_drift = leading_f32(arg),
            "ATTEND_FOCUS" => self.attend_focus = clamp01(leading_f32(arg)),
            "ATTEND_SPREAD" => self.attend_spread = clamp01(leading_f32(arg)),
            "TUNNEL_THRESHOLD" => self.tunnel_threshold = clamp01(leading_f32(arg)),
            "TUNNEL_CHANCE" => self.tunnel_chance = clamp01(leading_f32(arg)),
            "TUNNEL_SKIP_MAX" => {
                self.tunnel_skip_max = leading_i32(arg).clamp(TUNNEL_SKIP_RANGE.0, TUNNEL_SKIP_RANGE.1)
            }
            "JUMP" => {
                self.pending_jump = self
                    .pending_jump
                    .saturating_add(leading_i32(arg))
                    .clamp(-JUMP_LIMIT, JUMP_LIMIT)
            }
            "PAIN" => self.pain = clamp01(leading_f32(arg)),
            "TENSION" => self.tension = clamp01(leading_f32(arg)),
            "DISSONANCE" => self.dissonance = clamp01(leading_f32(arg)),
            _ => return false,
        }
        true
    }

    /// All 13 scalars in fixed order: prophecy, destiny, wormhole,
    /// calendar_drift, attend_focus, attend_spread, tunnel_threshold,
    /// tunnel_chance, tunnel_skip_max, pending_jump, pain, tension, dissonance.
    pub fn snapshot(&self) -> [f32; FIELD_SNAPSHOT_LEN] {
        [
            self.prophecy as f32,
            self.destiny,
            self.wormhole,
            self.calendar_drift,
            self.attend_focus,
            self.attend_spread,
            self.tunnel_threshold,
            self.tunnel_chance,
            self.tunnel_skip_max as f32,
            self.pending_jump as f32,
            self.pain,
            self.tension,
            self.dissonance,
        ]
    }

    /// Return the pending jump and clear it.
    pub fn take_jump(&mut self) -> i32 {
        std::mem::take(&mut self.pending_jump)
    }
}

/// Longest numeric-looking prefix of `s` as `f32`, or 0.
fn leading_f32(s: &str) -> f32 {
    let end = s
        .char_indices()
        .find(|&(_, c)| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .map_or(s.len(), |(i, _)| i);
    let candidate = &s[..end];
    // Shrink until it parses: "1.5e" -> "1.5".
    (1..=candidate.len())
        .rev()
        .find_map(|n| candidate[..n].parse::<f32>().ok())
        .unwrap_or(0.0)
}

/// Optional sign and leading digits of `s` as `i32`, saturating; 0 if none.
fn leading_i32(s: &str) -> i32 {
    let bytes = s.as_bytes();
    let sign_len = usize::from(matches!(bytes.first(), Some(b'+' | b'-')));
    let digits = bytes[sign_len..].iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return 0;
    }
    let negative = bytes.first() == Some(&b'-');
    let mut value: i64 = 0;
    for &b in &bytes[sign_len..sign_len + digits] {
        value = (value * 10 + i64::from(b - b'0')).min(i64::from(i32::MAX));
    }
    if negative {
        value = -value;
    }
    value as i32
}
