//! Output mixing: a dry path through the volume stage and an optional
//! reverb send through the convolver and the wet gain stage.

use super::convolver::Convolver;

/// Which paths reach the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Routing {
    /// Reverb bypassed, only the dry path sounds.
    Dry,
    /// Dry path plus the reverb send.
    #[default]
    Wet,
    /// Dry path disconnected, only the reverb send sounds.
    WetOnly,
}

impl Routing {
    /// Next state of the reverb button: mixed, reverb only, off.
    pub fn toggled(self) -> Self {
        match self {
            Routing::Wet => Routing::WetOnly,
            Routing::WetOnly => Routing::Dry,
            Routing::Dry => Routing::Wet,
        }
    }

    /// Whether the convolver is fed in this state.
    pub fn uses_reverb(self) -> bool {
        !matches!(self, Routing::Dry)
    }
}

pub struct OutputGraph {
    routing: Routing,
    volume: f32,
    wet_gain: f32,
    convolver: Option<Box<Convolver>>,
    /// Scratch for the wet signal, sized for the largest block seen.
    wet: Vec<f32>,
}

impl OutputGraph {
    pub fn new(volume: f32, wet_gain: f32, max_block_samples: usize) -> Self {
        Self {
            routing: Routing::default(),
            volume,
            wet_gain,
            convolver: None,
            wet: vec![0.0; max_block_samples],
        }
    }

    pub fn routing(&self) -> Routing {
        self.routing
    }

    /// Switch routing. Bypassing or re-enabling the reverb drops its tail so
    /// turning it back on starts clean.
    pub fn apply_routing(&mut self, routing: Routing) {
        if routing == self.routing {
            return;
        }
        if routing.uses_reverb() != self.routing.uses_reverb() {
            self.reset();
        }
        self.routing = routing;
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume.max(0.0);
    }

    pub fn wet_gain(&self) -> f32 {
        self.wet_gain
    }

    pub fn set_wet_gain(&mut self, gain: f32) {
        self.wet_gain = gain.max(0.0);
    }

    pub fn has_kernel(&self) -> bool {
        self.convolver.is_some()
    }

    /// Swap in a prepared convolver, returning the previous one.
    pub fn set_convolver(&mut self, convolver: Box<Convolver>) -> Option<Box<Convolver>> {
        self.convolver.replace(convolver)
    }

    /// Frames the reverb keeps sounding after the input goes silent.
    pub fn tail_len(&self) -> usize {
        match &self.convolver {
            Some(conv) if self.routing.uses_reverb() => conv.tail_len(),
            _ => 0,
        }
    }

    /// Drop any buffered reverb tail, e.g. when a new session starts.
    pub fn reset(&mut self) {
        if let Some(conv) = &mut self.convolver {
            conv.reset();
        }
    }

    /// Mix interleaved stereo `block` in place.
    pub fn render(&mut self, block: &mut [f32]) {
        let conv = match (self.routing.uses_reverb(), &mut self.convolver) {
            (true, Some(conv)) => conv,
            _ => {
                for s in block.iter_mut() {
                    *s *= self.volume;
                }
                return;
            }
        };

        if self.wet.len() < block.len() {
            self.wet.resize(block.len(), 0.0);
        }
        let wet = &mut self.wet[..block.len()];
        conv.process(block, wet);

        let dry_gain = match self.routing {
            Routing::WetOnly => 0.0,
            _ => self.volume,
        };
        for (s, w) in block.iter_mut().zip(wet.iter()) {
            *s = *s * dry_gain + *w * self.wet_gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::ImpulseResponse;

    fn unit_convolver(block: usize) -> Box<Convolver> {
        let ir = ImpulseResponse {
            channels: vec![vec![1.0]],
            sample_rate: 48_000,
        };
        Box::new(Convolver::new(&ir, block, false))
    }

    #[test]
    fn test_dry_scales_by_volume() {
        let mut graph = OutputGraph::new(0.5, 0.6, 64);
        graph.set_convolver(unit_convolver(8));
        graph.apply_routing(Routing::Dry);

        let mut block = vec![1.0f32; 32];
        graph.render(&mut block);

        assert!(block.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_wet_without_kernel_is_dry() {
        let mut graph = OutputGraph::new(0.5, 0.6, 64);
        assert_eq!(graph.routing(), Routing::Wet);
        let mut block = vec![1.0f32; 32];
        graph.render(&mut block);
        assert!(block.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn test_wet_adds_reverb_send() {
        let mut graph = OutputGraph::new(0.5, 0.6, 16);
        graph.set_convolver(unit_convolver(8));

        // Larger than the scratch, forcing it to grow.
        let mut block = vec![1.0f32; 2 * 32];
        graph.render(&mut block);

        // Before the convolver latency only the dry path is heard.
        assert!((block[0] - 0.5).abs() < 1e-5);
        assert!((block[2 * 20] - 1.1).abs() < 1e-4);
    }

    #[test]
    fn test_toggle_drops_tail() {
        let mut graph = OutputGraph::new(1.0, 1.0, 64);
        graph.set_convolver(unit_convolver(8));
        let mut loud = vec![1.0f32; 2 * 12];
        graph.render(&mut loud);

        graph.apply_routing(Routing::Dry);
        graph.apply_routing(Routing::Dry.toggled());
        let mut silence = vec![0.0f32; 2 * 16];
        graph.render(&mut silence);

        assert!(silence.iter().all(|s| s.abs() < 1e-6));
    }

    #[test]
    fn test_wet_only_drops_dry_path() {
        let mut graph = OutputGraph::new(0.5, 0.6, 64);
        graph.set_convolver(unit_convolver(8));
        graph.apply_routing(Routing::WetOnly);

        let mut block = vec![1.0f32; 2 * 32];
        graph.render(&mut block);

        // Nothing sounds until the convolver latency has passed.
        assert!(block[..2 * 8].iter().all(|s| s.abs() < 1e-6));
        assert!((block[2 * 20] - 0.6).abs() < 1e-4);
    }

    #[test]
    fn test_wet_only_keeps_tail() {
        let mut graph = OutputGraph::new(1.0, 1.0, 64);
        graph.set_convolver(unit_convolver(8));
        let mut loud = vec![1.0f32; 2 * 8];
        graph.render(&mut loud);

        graph.apply_routing(Routing::WetOnly);
        let mut silence = vec![0.0f32; 2 * 8];
        graph.render(&mut silence);

        // The block fed while mixed comes out of the send after the switch.
        assert!(silence.iter().all(|s| (s - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_toggle_cycles_states() {
        assert_eq!(Routing::Wet.toggled(), Routing::WetOnly);
        assert_eq!(Routing::WetOnly.toggled(), Routing::Dry);
        assert_eq!(Routing::Dry.toggled(), Routing::Wet);
    }

    #[test]
    fn test_set_convolver_returns_previous() {
        let mut graph = OutputGraph::new(0.5, 0.6, 64);
        assert!(graph.set_convolver(unit_convolver(8)).is_none());
        assert!(graph.set_convolver(unit_convolver(16)).is_some());
        assert!(graph.has_kernel());
        assert_eq!(graph.tail_len(), 32);
        graph.apply_routing(Routing::Dry);
        assert_eq!(graph.tail_len(), 0);
    }

    #[test]
    fn test_gains_never_negative() {
        let mut graph = OutputGraph::new(0.5, 0.6, 64);
        graph.set_volume(-1.0);
        graph.set_wet_gain(-3.0);
        assert_eq!(graph.volume(), 0.0);
        assert_eq!(graph.wet_gain(), 0.0);
    }
}
