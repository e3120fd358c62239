use approx::assert_abs_diff_eq;

use cascade_demo::app::pipeline::{
    build_model, check_prediction, ground_truth, open_session, predict_truth, run_predict,
    run_scenario,
};
use cascade_demo::data::synthesize;
use cascade_demo::domain::{Integrand, ObservationWindow, RateName, ScenarioConfig};
use cascade_demo::engine::{Session, SessionOptions, SessionStore};
use cascade_demo::models::{LocationHierarchy, RateCurve, Vars};

fn config(dir: &tempfile::TempDir) -> ScenarioConfig {
    ScenarioConfig {
        session_path: dir.path().join("session.json"),
        plot: false,
        ..ScenarioConfig::default()
    }
}

#[test]
fn covariate_free_predict_satisfies_every_request() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_predict(&config(&dir)).unwrap();
    assert!(out.prediction.not_predicted.is_empty());
    assert_eq!(out.prediction.predicted.len(), 120);
    assert!(out.prediction.predicted.iter().all(|p| p.sample_index == 0));
    assert!(check_prediction(&out.prediction).is_ok());
}

#[test]
fn predict_is_bit_identical_across_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let a = run_predict(&config(&dir)).unwrap();
    let b = run_predict(&config(&dir)).unwrap();
    let means = |p: &cascade_demo::engine::Prediction| -> Vec<u64> {
        p.predicted.iter().map(|r| r.mean.to_bits()).collect()
    };
    assert_eq!(means(&a.prediction), means(&b.prediction));
}

#[test]
fn requests_outside_the_hierarchy_fail_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let truth = ground_truth(&config).unwrap();
    let mut session = Session::new(
        LocationHierarchy::single("global", 1),
        1,
        &config.session_path,
        SessionOptions::default(),
    )
    .unwrap();
    let windows = vec![ObservationWindow::point(Integrand::Mtother, 7, 30.0, 2000.0)];
    let prediction = session.predict(&truth, &windows, 1).unwrap();
    assert_eq!(prediction.not_predicted.len(), 1);
    assert_eq!(check_prediction(&prediction).unwrap_err().exit_code(), 3);
}

#[test]
fn rates_extrapolate_flat_outside_the_knots() {
    let dir = tempfile::tempdir().unwrap();
    let truth = ground_truth(&config(&dir)).unwrap();
    let omega = &truth[&RateName::Omega];
    assert_eq!(omega.evaluate(130.0, 2000.0), omega.evaluate(120.0, 2000.0));
    assert_eq!(omega.evaluate(-5.0, 2000.0), omega.get(0, 0));
    assert_eq!(omega.evaluate(55.0, 1990.0), omega.evaluate(55.0, 2020.0));
}

#[test]
fn default_run_reports_every_part_of_the_fit() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(&dir);
    let run = run_scenario(&config).unwrap();

    assert_eq!(run.truth[&RateName::Omega].grid().ages().len(), 121);
    assert_eq!(run.truth[&RateName::Omega].grid().times(), &[2000.0]);
    assert_eq!(run.requests.len(), 120);

    let fit = &run.fit;
    assert!(!fit.fit.is_empty());
    assert!(!fit.prior_residuals.is_empty());
    assert!(!fit.data_residuals.is_empty());
    assert!(!fit.fit_data.is_empty());
    assert_eq!(fit.excluded_data.len(), 10);
    assert!(fit.excluded_data.iter().all(|r| r.hold_out));
    assert_eq!(fit.fit_data.len() + fit.excluded_data.len(), 120);
    assert_eq!(run.residuals.len(), 121);

    // The oldest data ages stay in the fit, so the tail is pinned down.
    for r in run.residuals.iter().filter(|r| r.age >= 117.0) {
        assert!((r.fit - r.truth).abs() < 0.2, "age {}: fit {} truth {}", r.age, r.fit, r.truth);
    }

    let stored = SessionStore::load(&config.session_path).unwrap();
    let messages: Vec<&str> = stored.log.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["end predict", "end fit"]);
}

#[test]
fn priors_centered_on_truth_recover_it_from_a_distant_start() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScenarioConfig {
        center_differences_on_truth: true,
        ..config(&dir)
    };
    let mut session = open_session(&config).unwrap();
    let predicted = predict_truth(&mut session, &config).unwrap();
    let truth = predicted.truth;
    let sample = synthesize(&predicted.prediction.predicted, &config).unwrap();
    let model = build_model(&config, &truth, session.locations()).unwrap();

    let start: Vars = truth
        .iter()
        .map(|(rate, curve)| {
            let scaled = curve.values().iter().map(|v| v * 1.5).collect();
            (*rate, RateCurve::new(curve.grid().clone(), scaled).unwrap())
        })
        .collect();
    let fit = session.fit(&model, &sample.data, &start).unwrap();

    assert!(fit.summary.iterations > 0);
    assert!(fit.summary.converged);
    for (rate, curve) in &truth {
        for (f, t) in fit.fit[rate].values().iter().zip(curve.values()) {
            assert_abs_diff_eq!(*f, *t, epsilon = 0.01);
        }
    }
}

#[test]
fn corrupted_band_stands_out_in_the_residuals() {
    let dir = tempfile::tempdir().unwrap();
    let config = ScenarioConfig {
        mess_factor: 3.0,
        ..config(&dir)
    };
    let run = run_scenario(&config).unwrap();
    assert_eq!(run.sample.corrupted, 10);
    assert!(run.band.inside_count > 0 && run.band.outside_count > 0);
    assert!(
        run.band.inside_mean_abs > run.band.outside_mean_abs,
        "inside {} vs outside {}",
        run.band.inside_mean_abs,
        run.band.outside_mean_abs
    );
}
