//! Submissions of the frame being recorded and the draws planned from them.
//!
//! Draws are planned objects first, then batches in submission order. The
//! vectors and selector scratch live across frames and are only cleared, so
//! a steady scene stops allocating once they reached their working size.

use std::ops::Range;

use orrery_core::math::{self, Mat4};
use orrery_core::BindingMode;

use crate::mesh::MeshId;
use crate::selector::Selector;
use crate::transforms::{BufferLayout, ObjectTransform, Region};

#[derive(Clone, Copy, Debug)]
struct PendingObject {
    mesh: MeshId,
    camera: usize,
    model: Mat4,
}

#[derive(Clone, Debug)]
struct PendingBatch {
    view_proj: Mat4,
    entries: Range<usize>,
}

/// One draw's transforms, before it has a region.
#[derive(Clone, Debug)]
pub(crate) enum Planned {
    Legacy(ObjectTransform),
    Instanced { view_proj: Mat4, models: Range<usize> },
}

/// A written region and the mesh it is drawn with.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PreparedDraw {
    pub mesh: MeshId,
    pub region: Region,
}

#[derive(Debug, Default)]
pub(crate) struct FrameWork {
    objects: Vec<PendingObject>,
    cameras: Vec<(Mat4, Mat4)>,
    batches: Vec<PendingBatch>,
    entries: Vec<(MeshId, Mat4)>,
    object_keys: Vec<(MeshId, usize)>,
    batch_keys: Vec<MeshId>,
    object_selector: Selector<(MeshId, usize)>,
    batch_selector: Selector<MeshId>,
    /// Draws in recording order: objects first, then batches.
    pub planned: Vec<(MeshId, Planned)>,
    /// Model matrices referenced by `Planned::Instanced`.
    pub models: Vec<Mat4>,
    pub draws: Vec<PreparedDraw>,
}

impl FrameWork {
    pub fn clear(&mut self) {
        self.objects.clear();
        self.cameras.clear();
        self.batches.clear();
        self.entries.clear();
        self.planned.clear();
        self.models.clear();
        self.draws.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.batches.is_empty()
    }

    pub fn push_object(&mut self, mesh: MeshId, model: Mat4, view: Mat4, proj: Mat4) {
        let camera = match self
            .cameras
            .iter()
            .position(|(v, p)| math::bits_eq(v, &view) && math::bits_eq(p, &proj))
        {
            Some(index) => index,
            None => {
                self.cameras.push((view, proj));
                self.cameras.len() - 1
            }
        };
        self.objects.push(PendingObject {
            mesh,
            camera,
            model,
        });
    }

    pub fn push_batch(&mut self, view_proj: Mat4, entries: impl IntoIterator<Item = (MeshId, Mat4)>) {
        let start = self.entries.len();
        self.entries.extend(entries);
        let end = self.entries.len();
        if end > start {
            self.batches.push(PendingBatch {
                view_proj,
                entries: start..end,
            });
        }
    }

    /// Plans every submission into [`Self::planned`].
    pub fn plan(&mut self, auto_instance: bool) {
        self.planned.clear();
        self.models.clear();

        self.object_keys.clear();
        self.object_keys
            .extend(self.objects.iter().map(|o| (o.mesh, o.camera)));
        for plan in self.object_selector.select(&self.object_keys, auto_instance) {
            let (mesh, camera) = plan.key;
            let (view, proj) = self.cameras[camera];
            match plan.mode {
                BindingMode::Legacy => {
                    for &member in &plan.members {
                        let object = ObjectTransform::new(self.objects[member].model, view, proj);
                        self.planned.push((mesh, Planned::Legacy(object)));
                    }
                }
                BindingMode::Instanced => {
                    let start = self.models.len();
                    self.models
                        .extend(plan.members.iter().map(|&member| self.objects[member].model));
                    self.planned.push((
                        mesh,
                        Planned::Instanced {
                            view_proj: math::compose_view_proj(&view, &proj),
                            models: start..self.models.len(),
                        },
                    ));
                }
            }
        }

        for batch in &self.batches {
            let entries = &self.entries[batch.entries.clone()];
            self.batch_keys.clear();
            self.batch_keys.extend(entries.iter().map(|&(mesh, _)| mesh));
            for plan in self.batch_selector.select(&self.batch_keys, true) {
                match plan.mode {
                    BindingMode::Legacy => {
                        for &member in &plan.members {
                            let object =
                                ObjectTransform::with_view_proj(entries[member].1, batch.view_proj);
                            self.planned.push((plan.key, Planned::Legacy(object)));
                        }
                    }
                    BindingMode::Instanced => {
                        let start = self.models.len();
                        self.models
                            .extend(plan.members.iter().map(|&member| entries[member].1));
                        self.planned.push((
                            plan.key,
                            Planned::Instanced {
                                view_proj: batch.view_proj,
                                models: start..self.models.len(),
                            },
                        ));
                    }
                }
            }
        }
    }

    /// Legacy blocks and aligned instance entries the plan needs.
    pub fn totals(&self, layout: &BufferLayout) -> (usize, usize) {
        self.planned
            .iter()
            .fold((0, 0), |(legacy, instanced), (_, planned)| match planned {
                Planned::Legacy(_) => (legacy + 1, instanced),
                Planned::Instanced { models, .. } => {
                    (legacy, instanced + layout.align_instances(models.len()))
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendLimits;
    use orrery_core::math::IDENTITY;

    fn ids() -> (MeshId, MeshId) {
        (MeshId::of_geometry(&[], &[0]), MeshId::of_geometry(&[], &[1]))
    }

    #[test]
    fn test_shared_camera_promotes_to_instanced() {
        let (cube, _) = ids();
        let view = math::translation(0.0, 0.0, -5.0);
        let mut work = FrameWork::default();
        for i in 0..3 {
            #[allow(clippy::cast_precision_loss)]
            let model = math::translation(i as f32, 0.0, 0.0);
            work.push_object(cube, model, view, IDENTITY);
        }

        work.plan(true);
        assert_eq!(work.planned.len(), 1);
        assert!(matches!(&work.planned[0].1, Planned::Instanced { models, .. } if *models == (0..3)));
        assert!(math::bits_eq(&work.models[2], &math::translation(2.0, 0.0, 0.0)));

        work.plan(false);
        assert_eq!(work.planned.len(), 3);
        assert!(work.planned.iter().all(|(_, p)| matches!(p, Planned::Legacy(_))));
    }

    #[test]
    fn test_different_cameras_stay_apart() {
        let (cube, _) = ids();
        let mut work = FrameWork::default();
        work.push_object(cube, IDENTITY, IDENTITY, IDENTITY);
        work.push_object(cube, IDENTITY, math::translation(0.0, 0.0, -1.0), IDENTITY);

        work.plan(true);
        assert_eq!(work.planned.len(), 2);
        assert!(work.planned.iter().all(|(_, p)| matches!(p, Planned::Legacy(_))));
    }

    #[test]
    fn test_batches_follow_objects_and_split_by_mesh() {
        let (cube, sphere) = ids();
        let mut work = FrameWork::default();
        work.push_batch(IDENTITY, [(cube, IDENTITY), (sphere, IDENTITY), (cube, IDENTITY)]);
        work.push_object(sphere, IDENTITY, IDENTITY, IDENTITY);
        work.push_batch(IDENTITY, std::iter::empty());

        work.plan(true);
        let meshes: Vec<MeshId> = work.planned.iter().map(|(mesh, _)| *mesh).collect();
        assert_eq!(meshes, vec![sphere, cube, sphere]);
        assert!(matches!(work.planned[0].1, Planned::Legacy(_)));
        assert!(matches!(work.planned[1].1, Planned::Instanced { .. }));
        assert!(matches!(work.planned[2].1, Planned::Legacy(_)));

        let layout = BufferLayout::from_limits(&BackendLimits::default());
        assert_eq!(work.totals(&layout), (2, 4));
    }

    #[test]
    fn test_replanning_after_clear() {
        let (cube, sphere) = ids();
        let mut work = FrameWork::default();
        work.push_batch(IDENTITY, [(cube, IDENTITY), (cube, IDENTITY), (sphere, IDENTITY)]);
        work.push_object(cube, IDENTITY, IDENTITY, IDENTITY);
        work.push_object(cube, IDENTITY, IDENTITY, IDENTITY);
        work.plan(true);
        assert_eq!(work.planned.len(), 3);

        work.clear();
        work.push_batch(IDENTITY, [(sphere, IDENTITY), (sphere, IDENTITY)]);
        work.plan(true);
        assert_eq!(work.planned.len(), 1);
        assert_eq!(work.planned[0].0, sphere);
        assert!(matches!(&work.planned[0].1, Planned::Instanced { models, .. } if *models == (0..2)));
    }
}
