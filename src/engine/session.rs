//! A modeling session: one hierarchy, one parent location, one store file.

use std::path::Path;

use chrono::Utc;

use crate::domain::{DataRecord, LocationId, ObservationWindow};
use crate::engine::store::{SessionMetadata, SessionStore};
use crate::engine::{
    BuiltinEngine, Engine, EngineContext, EngineError, FitResult, Prediction, SessionOptions,
};
use crate::models::{HierarchyError, LocationHierarchy, Model, Vars};

pub struct Session<E: Engine = BuiltinEngine> {
    engine: E,
    ctx: EngineContext,
    parent_location: LocationId,
    store: SessionStore,
}

impl Session<BuiltinEngine> {
    pub fn new(
        locations: LocationHierarchy,
        parent_location: LocationId,
        path: impl AsRef<Path>,
        options: SessionOptions,
    ) -> Result<Self, EngineError> {
        Self::with_engine(BuiltinEngine, locations, parent_location, path, options)
    }
}

impl<E: Engine> Session<E> {
    pub fn with_engine(
        engine: E,
        locations: LocationHierarchy,
        parent_location: LocationId,
        path: impl AsRef<Path>,
        options: SessionOptions,
    ) -> Result<Self, EngineError> {
        if !locations.contains(parent_location) {
            return Err(HierarchyError::UnknownLocation(parent_location).into());
        }
        options.validate()?;

        let metadata = SessionMetadata {
            tool: env!("CARGO_PKG_NAME").to_string(),
            engine: engine.name().to_string(),
            created: Utc::now(),
            parent_location,
            locations: locations.clone(),
            options: options.clone(),
        };
        let store = SessionStore::create(path.as_ref(), metadata)?;
        log::info!(
            "session for location {parent_location} at {}",
            store.path().display()
        );

        Ok(Self {
            engine,
            ctx: EngineContext { locations, options },
            parent_location,
            store,
        })
    }

    pub fn predict(
        &mut self,
        vars: &Vars,
        windows: &[ObservationWindow],
        parent: LocationId,
    ) -> Result<Prediction, EngineError> {
        // Rates must lie in their natural range before any engine sees them.
        Model::from_vars(vars, parent)?;
        let prediction = self.engine.predict(&self.ctx, vars, windows, parent)?;
        self.store.record_predict(vars, windows, &prediction)?;
        Ok(prediction)
    }

    pub fn fit(
        &mut self,
        model: &Model,
        data: &[DataRecord],
        initial: &Vars,
    ) -> Result<FitResult, EngineError> {
        let result = self.engine.fit(&self.ctx, model, data, initial)?;
        self.store.record_fit(model, data, initial, &result)?;
        Ok(result)
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    pub fn locations(&self) -> &LocationHierarchy {
        &self.ctx.locations
    }

    pub fn parent_location(&self) -> LocationId {
        self.parent_location
    }

    pub fn options(&self) -> &SessionOptions {
        &self.ctx.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Integrand, RateName};
    use crate::engine::SessionStore;
    use crate::models::{AgeTimeGrid, RateCurve};

    /// Engine that predicts a constant and never fits.
    struct Constant(f64);

    impl Engine for Constant {
        fn name(&self) -> &'static str {
            "constant"
        }

        fn predict(
            &self,
            _ctx: &EngineContext,
            _vars: &Vars,
            windows: &[ObservationWindow],
            _parent: LocationId,
        ) -> Result<Prediction, EngineError> {
            Ok(Prediction {
                predicted: windows
                    .iter()
                    .enumerate()
                    .map(|(i, w)| crate::domain::PredictedRecord {
                        sample_index: 0,
                        avgint_index: i,
                        window: w.clone(),
                        mean: self.0,
                    })
                    .collect(),
                not_predicted: Vec::new(),
            })
        }

        fn fit(
            &self,
            _ctx: &EngineContext,
            _model: &Model,
            _data: &[DataRecord],
            _initial: &Vars,
        ) -> Result<FitResult, EngineError> {
            Err(EngineError::EmptyModel)
        }
    }

    fn vars() -> Vars {
        let grid = AgeTimeGrid::new(vec![0.0, 100.0], vec![2000.0]).unwrap();
        let mut vars = Vars::new();
        vars.insert(RateName::Omega, RateCurve::constant(grid, 0.02).unwrap());
        vars
    }

    #[test]
    fn rejects_unknown_parent() {
        let dir = tempfile::tempdir().unwrap();
        let err = Session::new(
            LocationHierarchy::single("world", 1),
            7,
            dir.path().join("s.json"),
            SessionOptions::default(),
        )
        .err();
        assert!(matches!(
            err,
            Some(EngineError::Hierarchy(HierarchyError::UnknownLocation(7)))
        ));
    }

    #[test]
    fn builtin_predict_is_recorded_in_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.json");
        let mut session = Session::new(
            LocationHierarchy::single("world", 1),
            1,
            &path,
            SessionOptions::default(),
        )
        .unwrap();
        let windows = vec![ObservationWindow::point(Integrand::Mtother, 1, 30.0, 2000.0)];
        let out = session.predict(&vars(), &windows, 1).unwrap();
        assert_eq!(out.predicted.len(), 1);

        let file = SessionStore::load(session.path()).unwrap();
        assert_eq!(file.metadata.engine, "builtin");
        assert_eq!(file.outputs.predict, Some(out));
        assert_eq!(file.log.last().map(|l| l.message.as_str()), Some("end predict"));
    }

    #[test]
    fn predict_rejects_negative_rates_before_recording() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::with_engine(
            Constant(0.5),
            LocationHierarchy::single("world", 1),
            1,
            dir.path().join("s.json"),
            SessionOptions::default(),
        )
        .unwrap();
        let grid = AgeTimeGrid::new(vec![0.0, 100.0], vec![2000.0]).unwrap();
        let mut negative = Vars::new();
        negative.insert(RateName::Omega, RateCurve::new(grid, vec![0.02, -0.01]).unwrap());
        let windows = vec![ObservationWindow::point(Integrand::Mtother, 1, 30.0, 2000.0)];

        let err = session.predict(&negative, &windows, 1).err();
        assert!(matches!(err, Some(EngineError::Prior(_))));
        let file = SessionStore::load(session.path()).unwrap();
        assert_eq!(file.outputs.predict, None);
    }

    #[test]
    fn custom_engine_plugs_in() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::with_engine(
            Constant(0.5),
            LocationHierarchy::single("world", 1),
            1,
            dir.path().join("s.json"),
            SessionOptions::default(),
        )
        .unwrap();
        let windows = vec![ObservationWindow::point(Integrand::Prevalence, 1, 30.0, 2000.0)];
        let out = session.predict(&vars(), &windows, 1).unwrap();
        assert_eq!(out.predicted[0].mean, 0.5);
        assert!(session.fit(&Model::new(1, vec![]), &[], &vars()).is_err());
        assert_eq!(session.parent_location(), 1);
    }
}
