//! Path lookup from the root directory.

use super::{entry::DirectoryEntry, volume::Volume};
use crate::{
    error::{Error, Result},
    source::RangeSource,
};

/// Walks a `/`-separated `path` from the root of `volume`.
///
/// Empty and `.` components are ignored, so `""`, `"/"` and `"."` all name the root.  There is
/// no `..`: a component by that name has to exist like any other.  When a directory contains
/// several entries with the same name, the first one wins.
pub fn resolve<S: RangeSource>(volume: &Volume<S>, path: &str) -> Result<DirectoryEntry<S>> {
    let mut current = volume.root();
    let mut walked: Vec<&str> = vec![];

    for component in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
        if !current.is_directory()? {
            return Err(Error::NotADirectory {
                path: walked.join("/"),
            });
        }

        walked.push(component);
        current = current.child(component)?.ok_or_else(|| Error::NotFound {
            path: walked.join("/"),
        })?;
    }

    Ok(current)
}
