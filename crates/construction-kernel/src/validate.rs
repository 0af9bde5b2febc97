//! Placement validation.
//!
//! `validate_placement` is a pure check of one intent against the current
//! structure. Expected rejections come back as `Verdict::Invalid`; only
//! requests that can never succeed are `Err`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::block::BlockKind;
use crate::error::{PlacementDefect, PlacementFailure};
use crate::geometry::{Coord, Rotation, Vec3i};
use crate::structure::{CellSpec, CellState, SpecState, Structure};

/// A candidate placement, built on arrival and consumed immediately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlacementIntent {
    pub block: BlockKind,
    /// Anchor site; must be relative to the virtual origin
    pub site: Coord,
    /// Rotation about Z in radians
    pub z_rot: f64,
}

/// Outcome of validating an intent.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid,
    /// Accepted without the shape check, which does not exist for this case yet.
    NotYetEnforced { reason: String },
    Invalid(PlacementFailure),
}

impl Verdict {
    /// Whether the intent may go on to `Structure::commit`.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Verdict::Invalid(_))
    }

    pub fn reason(&self) -> String {
        match self {
            Verdict::Valid => "valid".to_string(),
            Verdict::NotYetEnforced { reason } => reason.clone(),
            Verdict::Invalid(failure) => failure.to_string(),
        }
    }
}

/// Check an intent against the structure, short-circuiting on the first problem.
///
/// Order: frame, anchor occupancy, spec, rotation, block shape.
pub fn validate_placement(
    structure: &Structure,
    intent: &PlacementIntent,
) -> Result<Verdict, PlacementDefect> {
    if !intent.site.is_virtual() {
        return Ok(Verdict::Invalid(PlacementFailure::Frame { site: intent.site }));
    }

    let site = intent.site.offset;
    let cell = structure.access(site)?;
    match cell.state() {
        CellState::HasBlock(block) => {
            return Ok(Verdict::Invalid(PlacementFailure::Occupied { site, block }));
        }
        CellState::BlockExtent(block) => {
            return Ok(Verdict::Invalid(PlacementFailure::InBlockExtent { site, block }));
        }
        CellState::Empty => {}
    }

    let real = structure.to_real(intent.site).offset;
    let Some(spec) = structure.cell_spec(real) else {
        return Ok(Verdict::Invalid(PlacementFailure::NoSpec { site }));
    };

    let Some(rotation) = Rotation::from_radians(intent.z_rot) else {
        return Err(PlacementDefect::BadRotation {
            radians: intent.z_rot,
            block: intent.block,
        });
    };

    let verdict = if !intent.block.is_orientation_dependent() {
        Verdict::Valid
    } else if let Some(failure) = orientation_mismatch(site, intent.block, rotation, spec) {
        Verdict::Invalid(failure)
    } else if !rotation.is_x_aligned() {
        Verdict::NotYetEnforced {
            reason: format!("{} footprint checks at {} are not enforced", intent.block, rotation),
        }
    } else {
        validate_extent(structure, intent, rotation, spec)
    };

    debug!(site = %intent.site, block = %intent.block, verdict = %verdict.reason(), "Validated placement");
    Ok(verdict)
}

/// The anchor's spec must name this block and lie along the same axis.
fn orientation_mismatch(
    site: Vec3i,
    block: BlockKind,
    rotation: Rotation,
    spec: &CellSpec,
) -> Option<PlacementFailure> {
    if spec.kind != block || spec.state != SpecState::Anchor {
        return Some(PlacementFailure::FootprintMismatch {
            at: site,
            reason: format!("spec expects {} {:?}", spec.kind, spec.state),
        });
    }
    if spec.rotation.is_x_aligned() != rotation.is_x_aligned() {
        return Some(PlacementFailure::FootprintMismatch {
            at: site,
            reason: format!("spec rotation {} runs across rotation {}", spec.rotation, rotation),
        });
    }
    None
}

/// Footprint checks at 0°/180°: every extent cell must be in range, empty,
/// and one the anchor's spec lays claim to.
fn validate_extent(
    structure: &Structure,
    intent: &PlacementIntent,
    rotation: Rotation,
    spec: &CellSpec,
) -> Verdict {
    let site = intent.site.offset;
    let real_anchor = structure.to_real(intent.site).offset;
    let owned = spec.kind.extent(real_anchor, spec.rotation);

    for at in intent.block.extent(site, rotation) {
        let Ok(cell) = structure.access(at) else {
            return Verdict::Invalid(PlacementFailure::FootprintOutOfRange { at });
        };
        if !cell.is_empty() {
            return Verdict::Invalid(PlacementFailure::FootprintOccupied { at });
        }
        let real = structure.to_real(Coord { offset: at, frame: intent.site.frame }).offset;
        if !owned.contains(&real) {
            return Verdict::Invalid(PlacementFailure::FootprintMismatch {
                at,
                reason: format!("not part of the {} anchored at {}", spec.kind, real_anchor),
            });
        }
        match structure.cell_spec(real) {
            Some(cell_spec) if cell_spec.kind == spec.kind && cell_spec.state == SpecState::Extent => {}
            Some(cell_spec) => {
                return Verdict::Invalid(PlacementFailure::FootprintMismatch {
                    at,
                    reason: format!("spec expects {} {:?}", cell_spec.kind, cell_spec.state),
                });
            }
            None => {
                return Verdict::Invalid(PlacementFailure::FootprintMismatch {
                    at,
                    reason: "no spec".to_string(),
                });
            }
        }
    }
    Verdict::Valid
}
