use pdfium_render::prelude::*;

use crate::error::DetectError;

/// Bind the statically linked pdfium library.
///
/// Binding is cheap; callers create an instance per blocking task rather
/// than sharing one across threads.
pub fn bind_pdfium() -> Result<Pdfium, DetectError> {
    let bindings = Pdfium::bind_to_statically_linked_library().map_err(DetectError::Pdf)?;
    Ok(Pdfium::new(bindings))
}
