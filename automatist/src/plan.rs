//! `plan`
//!
//! The planning session: the image and settings the operator has chosen, and the
//! plan made from them.

use image::{DynamicImage, GenericImageView, RgbaImage};

use crate::{
    bitmap::{convert_image, place_on_bed, Bitmap, Placement},
    error::{ConfigurationError, PlanError},
    geometry::CurveSequence,
    normalize::normalize,
    optimize::{pen_up_travel, PathOptimizer},
    preview::render_preview,
    program::MotionProgram,
    settings::PlanSettings,
    status::{Severity, StatusSink, StatusUpdate},
    synthesize::{synthesize, PlanConfiguration},
    trace::Vectorizer,
};

/// The stages of plan creation, in order.
const STAGES: [&str; 7] = [
    "Reading",
    "Converting",
    "Moving",
    "Tracing",
    "Minimizing",
    "Viewing",
    "Coding",
];

/// A finished plan. The curves and the program are always made together and
/// thrown away together.
#[derive(Debug, Clone)]
pub struct Plan {
    /// The curves, in drawing order, in bitmap pixel space.
    pub curves: CurveSequence,
    /// The motion program that draws the curves.
    pub program: MotionProgram,
    /// What the drawing will look like, if it could be rendered.
    pub preview: Option<RgbaImage>,
    /// The settings the plan was made with.
    pub configuration: PlanConfiguration,
    /// The bitmap that was traced.
    pub bitmap: Bitmap,
}

/// The operator's choices, and the plan made from them.
///
/// Any change to the choices throws the plan away, so a plan never outlives the
/// settings it was made with.
#[derive(Debug, Default)]
pub struct PlanningSession {
    /// The plan settings.
    settings: PlanSettings,
    /// The selected image, if any.
    image: Option<DynamicImage>,
    /// Where the image sits on the bed.
    placement: Option<Placement>,
    /// The current plan, if one has been made since the last change.
    plan: Option<Plan>,
}

impl PlanningSession {
    /// Creates a new [`PlanningSession`] with no image.
    ///
    /// # Arguments
    /// * `settings`: The plan settings.
    ///
    /// # Returns
    /// A new [`PlanningSession`].
    pub fn new(settings: PlanSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    /// Gets the plan settings.
    pub fn settings(&self) -> &PlanSettings {
        &self.settings
    }

    /// Replaces the plan settings, discarding the current plan.
    pub fn set_settings(&mut self, settings: PlanSettings) {
        self.settings = settings;
        self.invalidate();
    }

    /// Gets the selected image.
    pub fn image(&self) -> Option<&DynamicImage> {
        self.image.as_ref()
    }

    /// Selects an image and places it in the middle of the bed, discarding the current plan.
    ///
    /// # Arguments
    /// * `image`: The image to draw.
    pub fn set_image(&mut self, image: DynamicImage) {
        let (width, height) = image.dimensions();
        self.placement = Some(Placement::fit(width, height, self.settings.bed()));
        self.image = Some(image);
        self.invalidate();
    }

    /// Deselects the image, discarding the current plan.
    pub fn clear_image(&mut self) {
        self.image = None;
        self.placement = None;
        self.invalidate();
    }

    /// Gets where the image sits on the bed.
    pub fn placement(&self) -> Option<Placement> {
        self.placement
    }

    /// Moves or resizes the image, discarding the current plan.
    ///
    /// # Arguments
    /// * `placement`: Where the image now sits.
    pub fn set_placement(&mut self, placement: Placement) {
        self.placement = Some(placement);
        self.invalidate();
    }

    /// Gets the current plan.
    pub fn plan(&self) -> Option<&Plan> {
        self.plan.as_ref()
    }

    /// Discards the current plan.
    pub fn invalidate(&mut self) {
        if self.plan.take().is_some() {
            log::debug!("plan discarded");
        }
    }

    /// Makes a new plan from the current image and settings.
    ///
    /// The current plan is discarded first, so on failure there is no plan.
    ///
    /// # Arguments
    /// * `vectorizer`: Traces the bitmap.
    /// * `optimizer`: Orders the traced curves.
    /// * `status`: Receives the stage of plan creation, and the outcome.
    ///
    /// # Returns
    /// The new plan.
    ///
    /// # Errors
    /// [`PlanError`] if the inputs are unusable or tracing failed.
    pub fn create_plan(
        &mut self,
        vectorizer: &dyn Vectorizer,
        optimizer: &dyn PathOptimizer,
        status: &mut dyn StatusSink,
    ) -> Result<&Plan, PlanError> {
        self.invalidate();

        match self.build_plan(vectorizer, optimizer, status) {
            Ok(plan) => {
                status.update(StatusUpdate::plan("Yes", Severity::Ok));
                Ok(self.plan.insert(plan))
            }
            Err(err) => {
                let (label, severity) = match err {
                    PlanError::Configuration(_) => ("Warning", Severity::Warn),
                    PlanError::Trace(_) => ("Error", Severity::Error),
                };
                log::warn!("could not create plan: {err}");
                status.update(StatusUpdate::plan(label, severity));
                Err(err)
            }
        }
    }

    /// Runs each stage of plan creation in turn.
    fn build_plan(
        &self,
        vectorizer: &dyn Vectorizer,
        optimizer: &dyn PathOptimizer,
        status: &mut dyn StatusSink,
    ) -> Result<Plan, PlanError> {
        report_stage(status, 0);
        self.settings.validate()?;
        let (Some(image), Some(placement)) = (&self.image, &self.placement) else {
            return Err(ConfigurationError::NoImage.into());
        };

        report_stage(status, 1);
        let ink = convert_image(image, placement, &self.settings)?;

        report_stage(status, 2);
        let bitmap = place_on_bed(&ink, placement, &self.settings)?;

        report_stage(status, 3);
        let curves = normalize(&vectorizer.vectorize(&bitmap)?);

        report_stage(status, 4);
        let travel_before = pen_up_travel(&curves);
        let curves = optimizer.optimize(curves);
        log::info!(
            "{} curves, pen-up travel {travel_before:.1} px reduced to {:.1} px",
            curves.len(),
            pen_up_travel(&curves)
        );

        report_stage(status, 5);
        let thickness_px = self.settings.pen_thickness_mm * self.settings.pixels_per_mm;
        let preview = render_preview(&curves, bitmap.size(), thickness_px);

        report_stage(status, 6);
        let configuration = PlanConfiguration::new(&self.settings, bitmap.size())?;
        let program = synthesize(&curves, &configuration);

        Ok(Plan {
            curves,
            program,
            preview,
            configuration,
            bitmap,
        })
    }
}

/// Tells the operator which stage plan creation has reached.
fn report_stage(status: &mut dyn StatusSink, index: usize) {
    let name = STAGES[index];
    log::debug!("plan stage {name}");
    status.update(StatusUpdate::plan(
        format!("({}/{}) {name}...", index + 1, STAGES.len()),
        Severity::Warn,
    ));
}

#[cfg(test)]
mod tests {
    use image::{GrayImage, Luma};

    use super::*;
    use crate::{
        error::TraceError,
        geometry::PixelPoint,
        normalize::{RawPath, RawSegment},
        optimize::Identity,
    };

    /// Traces every bitmap as one square outline.
    struct FixedTracer;

    impl Vectorizer for FixedTracer {
        fn vectorize(&self, _bitmap: &Bitmap) -> Result<Vec<RawPath>, TraceError> {
            let corners = [(10.0, 10.0), (20.0, 10.0), (20.0, 20.0), (10.0, 20.0)];
            let mut path = RawPath::new(PixelPoint::new(corners[0].0, corners[0].1));
            for (x, y) in corners.iter().cycle().skip(1).take(4) {
                let from = path.current_point();
                path.segments
                    .push(RawSegment::line(from, PixelPoint::new(*x, *y)));
            }
            Ok(vec![path])
        }
    }

    /// Always fails.
    struct BrokenTracer;

    impl Vectorizer for BrokenTracer {
        fn vectorize(&self, _bitmap: &Bitmap) -> Result<Vec<RawPath>, TraceError> {
            Err(TraceError::Io(std::io::Error::other("broken")))
        }
    }

    fn session() -> PlanningSession {
        let mut session = PlanningSession::new(PlanSettings {
            bed_width_mm: 40.0,
            bed_height_mm: 30.0,
            pixels_per_mm: 2.0,
            safety_margin_mm: 1.0,
            ..PlanSettings::default()
        });
        session.set_image(DynamicImage::ImageLuma8(GrayImage::from_pixel(
            8,
            8,
            Luma([0]),
        )));
        session
    }

    fn labels(updates: &[StatusUpdate]) -> Vec<&str> {
        updates
            .iter()
            .filter_map(|update| match update {
                StatusUpdate::Plan { label, .. } => Some(label.as_str()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_create_plan_reports_every_stage() {
        let mut session = session();
        let mut updates: Vec<StatusUpdate> = vec![];

        let plan = session
            .create_plan(&FixedTracer, &Identity, &mut updates)
            .expect("plan must be created");
        assert_eq!(plan.curves.len(), 4);
        assert_eq!(plan.bitmap.size().width, 80);
        assert!(plan.preview.is_some(), "preview is rendered");
        assert_eq!(plan.program.lines()[0], "G21");

        assert_eq!(
            labels(&updates),
            [
                "(1/7) Reading...",
                "(2/7) Converting...",
                "(3/7) Moving...",
                "(4/7) Tracing...",
                "(5/7) Minimizing...",
                "(6/7) Viewing...",
                "(7/7) Coding...",
                "Yes"
            ]
        );
        assert_eq!(updates.last().map(StatusUpdate::severity), Some(Severity::Ok));
        assert!(session.plan().is_some());
    }

    #[test]
    fn test_no_image_is_a_warning() {
        let mut session = PlanningSession::default();
        let mut updates: Vec<StatusUpdate> = vec![];

        let result = session.create_plan(&FixedTracer, &Identity, &mut updates);
        assert!(matches!(
            result,
            Err(PlanError::Configuration(ConfigurationError::NoImage))
        ));
        assert_eq!(labels(&updates), ["(1/7) Reading...", "Warning"]);
        assert_eq!(updates.last().map(StatusUpdate::severity), Some(Severity::Warn));
    }

    #[test]
    fn test_failed_rebuild_discards_old_plan() {
        let mut session = session();
        session
            .create_plan(&FixedTracer, &Identity, &mut Vec::<StatusUpdate>::new())
            .expect("plan must be created");

        let mut updates: Vec<StatusUpdate> = vec![];
        assert!(session
            .create_plan(&BrokenTracer, &Identity, &mut updates)
            .is_err());
        assert!(session.plan().is_none(), "old plan must not survive a rebuild");
        assert_eq!(labels(&updates).last(), Some(&"Error"));
    }

    #[test]
    fn test_every_change_discards_the_plan() {
        let changes: [fn(&mut PlanningSession); 4] = [
            |session| session.set_settings(PlanSettings::default()),
            |session| {
                let placement = session.placement().expect("image is placed");
                session.set_placement(Placement {
                    x_mm: 1.0,
                    ..placement
                });
            },
            |session| session.set_image(DynamicImage::new_luma8(4, 4)),
            PlanningSession::clear_image,
        ];

        for change in changes {
            let mut session = session();
            session
                .create_plan(&FixedTracer, &Identity, &mut Vec::<StatusUpdate>::new())
                .expect("plan must be created");
            change(&mut session);
            assert!(session.plan().is_none(), "plan must be discarded");
        }
    }

    #[test]
    fn test_image_is_fitted_to_the_bed() {
        let session = session();
        assert_eq!(
            session.placement(),
            Some(Placement {
                x_mm: 0.0,
                y_mm: 0.0,
                width_mm: 24.0,
                height_mm: 24.0
            })
        );
    }
}
