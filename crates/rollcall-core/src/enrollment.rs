//! Enrollment: load reference images per person and encode them.
//!
//! The enrollment root holds one subdirectory per person; the directory name
//! is the person's name and every decodable image inside is one reference
//! photo.

use crate::engine::{EngineError, FaceEngine};
use crate::matcher::{KnownFaces, Label};
use image::{ImageReader, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollmentError {
    #[error("enrollment directory not found: {}", .0.display())]
    MissingDirectory(PathBuf),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// One reference photo of an enrolled person.
pub struct Enrollee {
    pub name: String,
    pub image: RgbImage,
    pub source: PathBuf,
}

/// Scan `root` for `<name>/<image>` files and decode them.
///
/// Files that are not decodable images are skipped. Directories and files
/// are visited in sorted order so the resulting table is deterministic.
pub fn load_enrollees(root: &Path) -> Result<Vec<Enrollee>, EnrollmentError> {
    if !root.is_dir() {
        return Err(EnrollmentError::MissingDirectory(root.to_path_buf()));
    }

    let people = sorted_entries(root)?
        .into_iter()
        .filter(|p| p.is_dir())
        .collect::<Vec<_>>();
    tracing::info!(count = people.len(), root = %root.display(), "enrollees found");

    let mut enrollees = Vec::new();
    for dir in people {
        let Some(name) = dir.file_name().and_then(|n| n.to_str()).map(str::to_owned) else {
            tracing::warn!(path = %dir.display(), "skipping directory with non-UTF-8 name");
            continue;
        };
        if name.to_uppercase() == Label::Unknown.to_string() {
            tracing::warn!(path = %dir.display(), "skipping folder named after the unknown label");
            continue;
        }

        for path in sorted_entries(&dir)?.into_iter().filter(|p| p.is_file()) {
            match decode(&path) {
                Some(image) => enrollees.push(Enrollee {
                    name: name.clone(),
                    image,
                    source: path,
                }),
                None => tracing::debug!(path = %path.display(), "not a decodable image, skipped"),
            }
        }
    }

    Ok(enrollees)
}

/// Build the known-face table, one entry per enrollee image that has a face.
///
/// Images without a face are skipped with a warning. Images with several
/// faces contribute only the most confident detection, also with a warning.
pub fn encode_enrollees<E: FaceEngine>(
    engine: &mut E,
    enrollees: Vec<Enrollee>,
) -> Result<KnownFaces, EnrollmentError> {
    let mut known = KnownFaces::new();

    for enrollee in enrollees {
        let faces = engine.locate(&enrollee.image)?;
        let Some(first) = faces.first() else {
            tracing::warn!(
                name = %enrollee.name,
                path = %enrollee.source.display(),
                "no face detected in enrollment image, skipped"
            );
            continue;
        };

        if faces.len() > 1 {
            tracing::warn!(
                name = %enrollee.name,
                path = %enrollee.source.display(),
                faces = faces.len(),
                "several faces in enrollment image, using the most confident one"
            );
        }

        match engine.encode(&enrollee.image, std::slice::from_ref(first))?.into_iter().next() {
            Some(embedding) => known.push(enrollee.name, embedding),
            None => tracing::warn!(
                name = %enrollee.name,
                path = %enrollee.source.display(),
                "face could not be encoded, skipped"
            ),
        }
    }

    tracing::info!(encoded = known.len(), "encoding complete");
    Ok(known)
}

/// Load and encode in one step.
pub fn enroll_directory<E: FaceEngine>(
    engine: &mut E,
    root: &Path,
) -> Result<KnownFaces, EnrollmentError> {
    let enrollees = load_enrollees(root)?;
    encode_enrollees(engine, enrollees)
}

fn decode(path: &Path) -> Option<RgbImage> {
    let image = ImageReader::open(path).ok()?.with_guessed_format().ok()?.decode().ok()?;
    Some(image.to_rgb8())
}

fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, EnrollmentError> {
    let io_err = |source| EnrollmentError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut paths = fs::read_dir(dir)
        .map_err(io_err)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_err)?;
    paths.sort();
    Ok(paths)
}
