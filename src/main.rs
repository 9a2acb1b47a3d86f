use lane_sim::math::Point2d;
use lane_sim::{
    Demand, DetectorSample, Generator, LaneAttributes, LaneId, LaneType, Network, RemovalReason,
    Route, RsuId, SimConfig, SimObserver, Simulation, StepReport,
};
use log::{info, warn};
use std::error::Error;

/// Destination at the end of the main road.
const EXIT: u32 = 10;

/// Logs detector aggregates and keeps a tally of departures.
#[derive(Default)]
struct LogObserver {
    arrived: usize,
    other: usize,
    admitted: usize,
}

impl SimObserver for LogObserver {
    fn on_detector_sample(&mut self, _rsu: RsuId, lane: u32, sample: &DetectorSample) {
        info!(
            "t = {:>6.0} s  lane {}: {} veh, mean speed {}",
            sample.time,
            lane,
            sample.count,
            sample
                .mean_speed
                .map_or("-".to_string(), |v| format!("{:.1} km/h", v * 3.6))
        );
    }

    fn on_collision(&mut self, collision: &lane_sim::Collision) {
        warn!("collision: {:?}", collision);
    }

    fn on_vehicle_removed(&mut self, _serial: u64, reason: RemovalReason) {
        match reason {
            RemovalReason::Arrived => self.arrived += 1,
            _ => self.other += 1,
        }
    }

    fn on_step_end(&mut self, report: &StepReport) {
        self.admitted += report.admitted.len();
    }

    fn on_finish(&mut self, time: f64) {
        info!(
            "t = {:.0} s: {} admitted, {} arrived, {} removed otherwise",
            time, self.admitted, self.arrived, self.other
        );
    }
}

/// A two-lane road with an on-ramp merging from the right between 300 m and 600 m.
fn build_network() -> Result<(Network, [LaneId; 3]), Box<dyn Error>> {
    let mut builder = Network::builder();
    let p = |x, y| Point2d::new(x, y);
    let speed = 100.0 / 3.6;

    let mut sections = vec![];
    for (i, (from, to)) in [(0.0, 300.0), (300.0, 600.0), (600.0, 1500.0)].into_iter().enumerate() {
        let number = 10 * (i as u32 + 1);
        let mut left = LaneAttributes::straight(number + 1, p(from, 3.5), p(to, 3.5), speed);
        let mut right = LaneAttributes::straight(number + 2, p(from, 0.0), p(to, 0.0), speed);
        if i == 2 {
            left = left.with_destination(EXIT);
            right = right.with_destination(EXIT);
        }
        let left = builder.add_lane(left)?;
        let right = builder.add_lane(right)?;
        builder.connect_lateral(left, right, true, true)?;
        sections.push((left, right));
    }
    for pair in sections.windows(2) {
        builder.connect(pair[0].0, pair[1].0)?;
        builder.connect(pair[0].1, pair[1].1)?;
    }

    let ramp = builder.add_lane(
        LaneAttributes::straight(5, p(300.0, -3.5), p(600.0, -3.5), 80.0 / 3.6)
            .with_kind(LaneType::MergeTaper),
    )?;
    builder.connect_lateral(sections[1].1, ramp, false, true)?;

    let network = builder.build()?;
    Ok((network, [sections[0].0, sections[0].1, ramp]))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => SimConfig {
            duration: 900.0,
            ..Default::default()
        },
    };

    let (network, [left, right, ramp]) = build_network()?;
    let mut sim = Simulation::new(network, config)?;
    let route = Route::new(vec![EXIT]);
    for (lane, flow) in [(left, 1400.0), (right, 1000.0), (ramp, 500.0)] {
        sim.add_generator(
            Generator::new(lane, 10.0, Demand::Poisson { flow }).with_route(route.clone(), 1.0),
        )?;
    }
    for lane in [left, right] {
        sim.add_detector(lane, 250.0, None)?;
    }

    sim.run(&mut LogObserver::default())?;
    Ok(())
}
