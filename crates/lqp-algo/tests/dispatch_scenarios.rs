//! End-to-end dispatch studies on small radial feeders.
//!
//! Tests cover:
//! - Voltage support at a battery bus during a load spike
//! - Terminal SoC banding at the end of the study, also across short windows
//! - Infeasible timesteps recorded without aborting the run, in both
//!   coordination modes
//! - Local coordination re-checking remote floors after the per-battery solves
//! - Two batteries interacting under both coordination modes
//! - Zero-injection round trip
//! - Determinism and battery envelope invariants

use lqp_algo::dispatch::{
    BoundMode, Coordination, DispatchConfig, DispatchSolver, HorizonMode, ObjectiveWeights,
    TerminalScope, TerminalSocConfig,
};
use lqp_algo::{LinDistFlow, StepStatus};
use lqp_core::*;
use lqp_ts::ProfileSet;

const S_BASE: KilovoltAmperes = KilovoltAmperes(1000.0);

fn weights() -> ObjectiveWeights {
    ObjectiveWeights {
        losses: 1.0,
        voltage_deviation: 10.0,
        throughput: 0.01,
    }
}

/// sub - mid - 5, 0.02 + j0.04 p.u. per line.
fn three_bus(battery: Option<BatteryState>, vmin_5: Option<f64>) -> Network {
    let mut bus5 = BusSpec::new("5");
    if let Some(b) = battery {
        bus5 = bus5.with_battery(b);
    }
    if let Some(vmin) = vmin_5 {
        bus5 = bus5.with_limits(PerUnit(vmin), PerUnit(1.05));
    }
    NetworkBuilder::new("three-bus", SystemBase::new(S_BASE, Kilovolts(4.16)), "sub")
        .bus(BusSpec::new("sub"))
        .bus(BusSpec::new("mid"))
        .bus(bus5)
        .line(LineSpec::new("sub", "mid", 0.02, 0.04))
        .line(LineSpec::new("mid", "5", 0.02, 0.04))
        .build()
        .unwrap()
}

fn hourly(net: &Network, steps: usize) -> ProfileSet {
    let timestamps = (0..steps as i64).map(|t| t * 3600).collect();
    ProfileSet::zeros(net.bus_count(), timestamps, 1.0).unwrap()
}

fn spike_profiles(net: &Network) -> ProfileSet {
    let bus5 = net.bus_by_name("5").unwrap();
    let mut profiles = hourly(net, 12);
    for t in 0..12 {
        let (p, q) = if t == 10 { (1200.0, 400.0) } else { (100.0, 30.0) };
        profiles.add_load(t, bus5, Kilowatts(p), Kilovars(q));
    }
    profiles
}

fn big_battery() -> BatteryState {
    BatteryState::new(
        "bess-5",
        KilowattHours(1000.0),
        Kilowatts(500.0),
        KilovoltAmperes(500.0),
    )
}

fn v5_at(results: &lqp_algo::ResultsAggregator, net: &Network, t: usize) -> f64 {
    results.steps()[t].voltages[net.bus_by_name("5").unwrap().value()]
}

#[test]
fn load_spike_is_supported_by_battery() {
    for (mode, coordination) in [
        (HorizonMode::Joint, Coordination::Centralized),
        (HorizonMode::Rolling, Coordination::Centralized),
        (HorizonMode::Rolling, Coordination::Local),
    ] {
        let mut net = three_bus(Some(big_battery()), None);
        let profiles = spike_profiles(&net);
        let mut config = DispatchConfig::new(weights());
        config.horizon.mode = mode;
        config.horizon.window_steps = 3;
        config.coordination = coordination;

        let solver = DispatchSolver::new(&net, config).unwrap();
        let results = solver.run(&mut net, &profiles).unwrap();
        assert_eq!(results.len(), 12);

        let spike = &results.steps()[10];
        let bus5 = net.bus_by_name("5").unwrap().value();
        assert!(
            spike.baseline_voltages[bus5] < 0.95,
            "baseline should sag below 0.95"
        );
        assert_eq!(spike.status, StepStatus::Solved, "{:?}/{:?}", mode, coordination);
        let v5 = v5_at(&results, &net, 10);
        assert!(
            (0.95 - 1e-6..=1.05 + 1e-6).contains(&v5),
            "{:?}/{:?}: v5 = {}",
            mode,
            coordination,
            v5
        );

        // Re-evaluate LinDistFlow with the returned injections.
        let ldf = LinDistFlow::build(&net).unwrap();
        let (mut p, mut q) = profiles.net_injection_pu(10, S_BASE);
        let bat = &spike.batteries[0];
        p[bus5] += bat.p.to_per_unit(S_BASE);
        q[bus5] += bat.q.to_per_unit(S_BASE);
        let v = ldf.voltages(&p, &q);
        assert!((v[bus5] - v5).abs() < 1e-12);
        assert!(v[bus5] >= 0.95 - 1e-6);
    }
}

#[test]
fn terminal_soc_returns_to_target() {
    for (mode, window) in [(HorizonMode::Joint, 6), (HorizonMode::Rolling, 2)] {
        let battery = BatteryState::new(
            "bess",
            KilowattHours(100.0),
            Kilowatts(50.0),
            KilovoltAmperes(60.0),
        )
        .with_efficiencies(0.95, 0.95)
        .with_soc_fraction(0.2);
        let mut net = three_bus(Some(battery), None);
        let bus5 = net.bus_by_name("5").unwrap();
        let mut profiles = hourly(&net, 6);
        for t in 0..6 {
            profiles.add_load(t, bus5, Kilowatts(50.0), Kilovars(10.0));
        }

        let mut config = DispatchConfig::new(weights());
        config.horizon.mode = mode;
        config.horizon.window_steps = window;
        config.terminal_soc = Some(TerminalSocConfig {
            target_fraction: 0.5,
            tolerance_fraction: 0.01,
            scope: TerminalScope::HorizonEnd,
        });

        let solver = DispatchSolver::new(&net, config).unwrap();
        let results = solver.run(&mut net, &profiles).unwrap();
        assert_eq!(results.failed_steps().count(), 0);

        let last = results.battery_trajectory("bess").last().copied().cloned().unwrap();
        let fraction = last.soc.value() / 100.0;
        assert!(
            (0.49 - 1e-6..=0.51 + 1e-6).contains(&fraction),
            "{:?}: final SoC fraction {}",
            mode,
            fraction
        );
        // the live network carries the same SoC
        let live = net.batteries().next().unwrap().1;
        assert_eq!(live.soc, last.soc);
    }
}

#[test]
fn short_rolling_windows_still_meet_the_study_end_target() {
    // 10 kW can add at most 10 kWh per hour: reaching 49 kWh from 20 kWh
    // takes three of the six steps, more than any one window sees.
    for window in [1, 2] {
        let battery = BatteryState::new(
            "bess",
            KilowattHours(100.0),
            Kilowatts(10.0),
            KilovoltAmperes(20.0),
        )
        .with_soc_fraction(0.2);
        let mut net = three_bus(Some(battery), None);
        let bus5 = net.bus_by_name("5").unwrap();
        let mut profiles = hourly(&net, 6);
        for t in 0..6 {
            profiles.add_load(t, bus5, Kilowatts(800.0), Kilovars(200.0));
        }

        let mut config = DispatchConfig::new(weights());
        config.horizon.mode = HorizonMode::Rolling;
        config.horizon.window_steps = window;
        config.terminal_soc = Some(TerminalSocConfig {
            target_fraction: 0.5,
            tolerance_fraction: 0.01,
            scope: TerminalScope::HorizonEnd,
        });

        let solver = DispatchSolver::new(&net, config).unwrap();
        let results = solver.run(&mut net, &profiles).unwrap();
        assert_eq!(results.len(), 6);
        assert_eq!(results.failed_steps().count(), 0, "window {}", window);

        let last = results.battery_trajectory("bess").last().copied().cloned().unwrap();
        assert!(
            (49.0 - 1e-3..=51.0 + 1e-3).contains(&last.soc.value()),
            "window {}: final SoC {}",
            window,
            last.soc
        );
    }
}

#[test]
fn unreachable_study_end_target_is_a_battery_error() {
    let slow = BatteryState::new("slow", KilowattHours(100.0), Kilowatts(10.0), KilovoltAmperes(10.0))
        .with_soc_fraction(0.2);
    let profiles = hourly(&three_bus(None, None), 2);
    let mut config = DispatchConfig::new(weights());
    config.terminal_soc = Some(TerminalSocConfig {
        target_fraction: 0.9,
        tolerance_fraction: 0.01,
        scope: TerminalScope::HorizonEnd,
    });

    let mut net = three_bus(Some(slow.clone()), None);
    let solver = DispatchSolver::new(&net, config.clone()).unwrap();
    let err = solver.run(&mut net, &profiles).unwrap_err();
    assert!(matches!(err, LqpError::Battery(ref e) if e.reason.contains("unreachable")));

    config.skip_invalid_batteries = true;
    let mut net = three_bus(Some(slow), None);
    let solver = DispatchSolver::new(&net, config).unwrap();
    let results = solver.run(&mut net, &profiles).unwrap();
    assert_eq!(results.skipped_batteries().len(), 1);
    assert_eq!(results.len(), 2);
}

#[test]
fn unreachable_voltage_floor_is_reported_per_timestep() {
    let dead = BatteryState::new("dead", KilowattHours(100.0), Kilowatts(0.0), KilovoltAmperes(0.0));
    // 300 kW + j100 kvar at bus 5 gives v5 ≈ 0.980 with no battery help.
    let build = || three_bus(Some(dead.clone()), Some(0.99));
    let net = build();
    let bus5 = net.bus_by_name("5").unwrap();
    let mut profiles = hourly(&net, 3);
    for t in 0..3 {
        profiles.add_load(t, bus5, Kilowatts(300.0), Kilovars(100.0));
    }

    let mut config = DispatchConfig::new(weights());
    config.voltage.relaxation.enabled = false;
    let mut net = build();
    let results = DispatchSolver::new(&net, config.clone())
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert_eq!(results.len(), 3);
    for step in results.steps() {
        assert_eq!(step.status, StepStatus::Failed);
        let msg = step.error.as_deref().unwrap();
        assert!(msg.contains("infeasible"), "{}", msg);
        assert!(msg.contains("relaxed: false"));
        assert!(step.objective.is_none());
    }

    // a 5 mV allowance is still not enough
    config.voltage.relaxation.enabled = true;
    config.voltage.relaxation.max_violation_pu = 0.005;
    let mut net = build();
    let results = DispatchSolver::new(&net, config.clone())
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert!(results
        .steps()
        .iter()
        .all(|s| s.error.as_deref().unwrap_or("").contains("relaxed: true")));

    // 50 mV is
    config.voltage.relaxation.max_violation_pu = 0.05;
    let mut net = build();
    let results = DispatchSolver::new(&net, config)
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert!(results.steps().iter().all(|s| s.status == StepStatus::Relaxed));
    assert!(results.steps()[0].max_violation_pu > 0.009);
}

#[test]
fn local_coordination_screens_buses_without_an_active_battery() {
    let dead = BatteryState::new("dead", KilowattHours(100.0), Kilowatts(0.0), KilovoltAmperes(0.0));
    let build = || three_bus(Some(dead.clone()), Some(0.99));
    let net = build();
    let bus5 = net.bus_by_name("5").unwrap();
    let mut profiles = hourly(&net, 3);
    for t in 0..3 {
        profiles.add_load(t, bus5, Kilowatts(300.0), Kilovars(100.0));
    }

    let mut config = DispatchConfig::new(weights());
    config.coordination = Coordination::Local;
    config.voltage.relaxation.enabled = false;
    let mut net = build();
    let results = DispatchSolver::new(&net, config.clone())
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert_eq!(results.len(), 3);
    for step in results.steps() {
        assert_eq!(step.status, StepStatus::Failed);
        let msg = step.error.as_deref().unwrap();
        assert!(msg.contains("infeasible"), "{}", msg);
        assert!(msg.contains("relaxed: false"));
    }

    config.voltage.relaxation.enabled = true;
    config.voltage.relaxation.max_violation_pu = 0.05;
    let mut net = build();
    let results = DispatchSolver::new(&net, config)
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert!(results.steps().iter().all(|s| s.status == StepStatus::Relaxed));
}

#[test]
fn local_coordination_holds_remote_floors_under_the_combined_dispatch() {
    // The battery sits at `mid`; only bus 5 carries the tight floor.
    let build = || {
        NetworkBuilder::new("three-bus", SystemBase::new(S_BASE, Kilovolts(4.16)), "sub")
            .bus(BusSpec::new("sub"))
            .bus(BusSpec::new("mid").with_battery(big_battery()))
            .bus(BusSpec::new("5").with_limits(PerUnit(0.99), PerUnit(1.05)))
            .line(LineSpec::new("sub", "mid", 0.02, 0.04))
            .line(LineSpec::new("mid", "5", 0.02, 0.04))
            .build()
            .unwrap()
    };
    let net = build();
    let bus5 = net.bus_by_name("5").unwrap();
    let mut profiles = hourly(&net, 2);
    for t in 0..2 {
        profiles.add_load(t, bus5, Kilowatts(300.0), Kilovars(100.0));
    }

    let mut config = DispatchConfig::new(weights());
    config.voltage.relaxation.enabled = false;
    let mut net = build();
    let results = DispatchSolver::new(&net, config.clone())
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert!(results.steps().iter().all(|s| s.status == StepStatus::Solved));

    config.coordination = Coordination::Local;
    let mut net = build();
    let results = DispatchSolver::new(&net, config.clone())
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    for step in results.steps() {
        assert_eq!(step.status, StepStatus::Failed);
        let msg = step.error.as_deref().unwrap();
        assert!(msg.contains("after local dispatch"), "{}", msg);
        assert!(msg.contains("relaxed: false"));
    }

    config.voltage.relaxation.enabled = true;
    config.voltage.relaxation.max_violation_pu = 0.05;
    let mut net = build();
    let results = DispatchSolver::new(&net, config)
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert!(results.steps().iter().all(|s| s.status == StepStatus::Relaxed));
}

#[test]
fn neighbouring_battery_cannot_drag_a_covered_bus_off_its_floor() {
    // Purely resistive feeder. The `mid` battery must charge ~390 kW to meet
    // its window band, which sags bus 5 further than its own 20 kVA battery
    // can lift it.
    let build = || {
        let big = BatteryState::new(
            "bess-mid",
            KilowattHours(1000.0),
            Kilowatts(500.0),
            KilovoltAmperes(500.0),
        )
        .with_soc_fraction(0.05);
        let small = BatteryState::new(
            "bess-5",
            KilowattHours(100.0),
            Kilowatts(20.0),
            KilovoltAmperes(20.0),
        )
        .with_soc_fraction(0.45);
        NetworkBuilder::new("resistive", SystemBase::new(S_BASE, Kilovolts(4.16)), "sub")
            .bus(BusSpec::new("sub"))
            .bus(BusSpec::new("mid").with_battery(big))
            .bus(
                BusSpec::new("5")
                    .with_battery(small)
                    .with_limits(PerUnit(0.992), PerUnit(1.05)),
            )
            .line(LineSpec::new("sub", "mid", 0.02, 0.0))
            .line(LineSpec::new("mid", "5", 0.02, 0.0))
            .build()
            .unwrap()
    };
    let net = build();
    let bus5 = net.bus_by_name("5").unwrap();
    let mut profiles = hourly(&net, 1);
    profiles.add_load(0, bus5, Kilowatts(50.0), Kilovars(15.0));

    let mut config = DispatchConfig::new(weights());
    config.horizon.mode = HorizonMode::Rolling;
    config.horizon.window_steps = 1;
    config.terminal_soc = Some(TerminalSocConfig {
        target_fraction: 0.45,
        tolerance_fraction: 0.01,
        scope: TerminalScope::EveryWindow,
    });
    config.voltage.relaxation.enabled = false;

    for coordination in [Coordination::Centralized, Coordination::Local] {
        let mut config = config.clone();
        config.coordination = coordination;
        let mut net = build();
        let results = DispatchSolver::new(&net, config)
            .unwrap()
            .run(&mut net, &profiles)
            .unwrap();
        let step = &results.steps()[0];
        assert_eq!(step.status, StepStatus::Failed, "{:?}", coordination);
        let msg = step.error.as_deref().unwrap();
        assert!(msg.contains("infeasible"), "{:?}: {}", coordination, msg);
        assert!(msg.contains("relaxed: false"), "{:?}: {}", coordination, msg);
    }

    config.voltage.relaxation.enabled = true;
    config.voltage.relaxation.max_violation_pu = 0.05;
    for coordination in [Coordination::Centralized, Coordination::Local] {
        let mut config = config.clone();
        config.coordination = coordination;
        let mut net = build();
        let results = DispatchSolver::new(&net, config)
            .unwrap()
            .run(&mut net, &profiles)
            .unwrap();
        let step = &results.steps()[0];
        assert_eq!(step.status, StepStatus::Relaxed, "{:?}", coordination);
        let v5 = v5_at(&results, &net, 0);
        assert!(v5 < 0.992 && v5 >= 0.942 - 1e-6, "{:?}: v5 = {}", coordination, v5);
    }
}

#[test]
fn energy_shortfall_fails_only_the_late_step() {
    // Purely resistive feeder: only real power moves the voltage.
    let battery = BatteryState::new("b", KilowattHours(1000.0), Kilowatts(500.0), KilovoltAmperes(600.0));
    let mut net = NetworkBuilder::new("r", SystemBase::new(S_BASE, Kilovolts(4.16)), "sub")
        .bus(BusSpec::new("sub"))
        .bus(BusSpec::new("mid"))
        .bus(BusSpec::new("5").with_battery(battery))
        .line(LineSpec::new("sub", "mid", 0.04, 0.0))
        .line(LineSpec::new("mid", "5", 0.04, 0.0))
        .build()
        .unwrap();
    let bus5 = net.bus_by_name("5").unwrap();
    let mut profiles = hourly(&net, 2);
    for t in 0..2 {
        profiles.add_load(t, bus5, Kilowatts(1000.0), Kilovars(0.0));
    }

    // Each step needs ≥ 390 kW of discharge; only 500 kWh is stored.
    let mut config = DispatchConfig::new(weights());
    config.horizon.mode = HorizonMode::Joint;
    config.voltage.relaxation.enabled = false;
    let results = DispatchSolver::new(&net, config)
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();

    assert_eq!(results.steps()[0].status, StepStatus::Solved);
    assert!(v5_at(&results, &net, 0) >= 0.95 - 1e-6);
    assert_eq!(results.steps()[1].status, StepStatus::Failed);
    let dispatch = &results.steps()[1].batteries[0];
    assert_eq!(dispatch.p, Kilowatts::ZERO);
}

#[test]
fn zero_network_is_flat_and_lossless() {
    let empty = BatteryState::new("empty", KilowattHours(0.0), Kilowatts(0.0), KilovoltAmperes(0.0));
    let mut net = NetworkBuilder::new("z", SystemBase::new(S_BASE, Kilovolts(4.16)), "sub")
        .slack_voltage(PerUnit(1.02))
        .bus(BusSpec::new("sub"))
        .bus(BusSpec::new("a"))
        .bus(BusSpec::new("b").with_battery(empty))
        .bus(BusSpec::new("c"))
        .line(LineSpec::new("sub", "a", 0.01, 0.02))
        .line(LineSpec::new("a", "b", 0.01, 0.02))
        .line(LineSpec::new("a", "c", 0.01, 0.02))
        .build()
        .unwrap();
    let profiles = hourly(&net, 4);
    for mode in [HorizonMode::Joint, HorizonMode::Rolling] {
        let mut config = DispatchConfig::new(weights());
        config.horizon.mode = mode;
        let results = DispatchSolver::new(&net, config)
            .unwrap()
            .run(&mut net, &profiles)
            .unwrap();
        for step in results.steps() {
            assert_eq!(step.losses, Kilowatts::ZERO);
            assert!(step.voltages.iter().all(|v| (v - 1.02).abs() < 1e-12));
            assert!(step.slack_p.value().abs() < 1e-12);
        }
        let summary = results.summary(&Default::default());
        assert_eq!(summary.total_losses_kwh, 0.0);
        assert_eq!(summary.battery_throughput_kwh, 0.0);
    }
}

fn two_battery_feeder() -> Network {
    let a = BatteryState::new("a-bess", KilowattHours(200.0), Kilowatts(80.0), KilovoltAmperes(100.0))
        .with_round_trip_efficiency(0.9)
        .with_reserve_band(0.1, 0.95)
        .with_soc_fraction(0.3);
    let c = BatteryState::new("c-bess", KilowattHours(50.0), Kilowatts(25.0), KilovoltAmperes(25.0))
        .with_soc_fraction(0.9);
    NetworkBuilder::new("pv", SystemBase::new(S_BASE, Kilovolts(4.16)), "sub")
        .bus(BusSpec::new("sub"))
        .bus(BusSpec::new("a").with_battery(a))
        .bus(BusSpec::new("b"))
        .bus(BusSpec::new("c").with_battery(c))
        .line(LineSpec::new("sub", "a", 0.01, 0.03))
        .line(LineSpec::new("a", "b", 0.02, 0.03))
        .line(LineSpec::new("b", "c", 0.02, 0.02))
        .build()
        .unwrap()
}

fn pv_day(net: &Network) -> ProfileSet {
    let mut profiles = hourly(net, 8);
    let b = net.bus_by_name("b").unwrap();
    let c = net.bus_by_name("c").unwrap();
    let pv = [0.0, 200.0, 600.0, 900.0, 700.0, 200.0, 0.0, 0.0];
    let load = [300.0, 250.0, 200.0, 200.0, 250.0, 500.0, 800.0, 600.0];
    for t in 0..8 {
        profiles.add_pv(t, c, Kilowatts(pv[t]), Kilovars(0.0));
        profiles.add_load(t, b, Kilowatts(load[t]), Kilovars(load[t] * 0.3));
    }
    profiles
}

#[test]
fn dispatch_respects_inverter_disk_and_soc_bounds() {
    for mode in [BoundMode::Hard, BoundMode::Soft] {
        let mut net = two_battery_feeder();
        let capacities: Vec<(String, KilovoltAmperes, KilowattHours)> = net
            .batteries()
            .map(|(_, b)| (b.name.clone(), b.inverter_limit, b.capacity))
            .collect();
        let profiles = pv_day(&net);
        let mut config = DispatchConfig::new(weights());
        config.voltage.mode = mode;
        config.horizon.window_steps = 3;
        let results = DispatchSolver::new(&net, config)
            .unwrap()
            .run(&mut net, &profiles)
            .unwrap();
        assert_eq!(results.failed_steps().count(), 0);

        for step in results.steps() {
            for d in &step.batteries {
                let (_, s_max, cap) = capacities.iter().find(|(n, _, _)| *n == d.battery).unwrap();
                let s = d.p.value().hypot(d.q.value());
                assert!(s <= s_max.value() * (1.0 + 1e-9), "{} at {}: {} kVA", d.battery, step.timestep, s);
                assert!(d.soc.value() >= -1e-9 && d.soc.value() <= cap.value() + 1e-9);
                assert!(d.charge.value() >= 0.0 && d.discharge.value() >= 0.0);
            }
            // slack balance: −Σ injections + losses
            let injected: f64 = step.batteries.iter().map(|d| d.p.value()).sum::<f64>()
                + profiles
                    .timestamps()
                    .iter()
                    .position(|&ts| ts == step.timestamp)
                    .map(|t| {
                        let (p, _) = profiles.net_injection_pu(t, S_BASE);
                        p.iter().sum::<f64>() * S_BASE.value()
                    })
                    .unwrap();
            assert!((step.slack_p.value() - (-injected + step.losses.value())).abs() < 1e-6);
        }
    }
}

#[test]
fn rebuilding_and_rerunning_is_deterministic() {
    let net = two_battery_feeder();
    let first = LinDistFlow::build(&net).unwrap();
    let second = LinDistFlow::build(&net).unwrap();
    assert_eq!(first.a_matrix(), second.a_matrix());
    assert_eq!(first.b_matrix(), second.b_matrix());

    let profiles = pv_day(&net);
    let run = || {
        let mut net = two_battery_feeder();
        DispatchSolver::new(&net, DispatchConfig::new(weights()))
            .unwrap()
            .run(&mut net, &profiles)
            .unwrap()
    };
    let (a, b) = (run(), run());
    assert_eq!(a.steps(), b.steps());
}

#[test]
fn imported_feeder_dispatches_with_static_loads() {
    let text = r#"{
        "name": "two-house",
        "base": { "s_base_kva": 100.0, "v_base_kv": 0.4 },
        "slack": { "bus": "sub" },
        "buses": [ { "name": "sub" }, { "name": "h1" }, { "name": "h2", "vmin_pu": 0.97 } ],
        "lines": [
            { "from": "sub", "to": "h1", "r_pu": 0.02, "x_pu": 0.01 },
            { "from": "h1", "to": "h2", "r_pu": 0.03, "x_pu": 0.015 }
        ],
        "batteries": [ { "bus": "h2", "capacity_kwh": 13.5, "power_kw": 5.0, "inverter_kva": 6.0 } ],
        "loads": [ { "bus": "h1", "p_kw": 20.0, "q_kvar": 5.0 }, { "bus": "h2", "p_kw": 25.0, "q_kvar": 8.0 } ]
    }"#;
    let import = lqp_io::parse_feeder(text).unwrap();
    let mut net = import.network.clone();
    let loads = import.static_load_tuples();
    let profiles = ProfileSet::constant(&net, 3, 1.0, &loads).unwrap();

    let results = DispatchSolver::new(&net, DispatchConfig::new(weights()))
        .unwrap()
        .run(&mut net, &profiles)
        .unwrap();
    assert_eq!(results.len(), 3);
    let h2 = net.bus_by_name("h2").unwrap();
    for step in results.steps() {
        assert_ne!(step.status, StepStatus::Failed);
        assert!(step.losses <= step.baseline_losses + Kilowatts(1e-9));
    }
    assert!(results.voltage_profile(h2).iter().all(|v| *v >= 0.97 - 1e-6));
}
