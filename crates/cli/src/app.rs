use std::{
    fs,
    io::{self, Write},
    path::Path,
    sync::Arc,
    time::Instant,
};

use anyhow::{Context, Result};
use got_ocr_config::AppConfig;
use got_ocr_core::{
    ImageSource, ModelCache, OcrDispatcher, OcrRequest, RequestFields, TempWorkspace, normalize,
};
use got_ocr_infer::GotModelLoader;
use tracing::info;

use crate::args::Args;

pub fn run(args: Args) -> Result<()> {
    let request = build_request(&args)?;

    let (mut app_config, descriptor) = AppConfig::load(args.config.as_deref())?;
    app_config += &args;
    info!(
        "Using configuration {} (model `{}`)",
        descriptor, app_config.model.source
    );

    let cache = Arc::new(ModelCache::new(GotModelLoader::from_config(&app_config)));
    let dispatcher = OcrDispatcher::new(Arc::clone(&cache));
    let outcome = execute(
        &dispatcher,
        &args.image,
        &request,
        args.output.as_deref(),
        &mut io::stdout().lock(),
    );
    cache.clear();
    outcome
}

/// Validates the OCR options. With `--output`, a successful render is also
/// published to the output path.
fn build_request(args: &Args) -> Result<OcrRequest> {
    let request = OcrRequest::parse(RequestFields {
        ocr_type: Some(&args.ocr_type),
        method: Some(&args.method),
        render: args.render,
        ocr_box: args.ocr_box.as_deref(),
        ocr_color: args.ocr_color.as_deref(),
    })?;
    Ok(match &args.output {
        Some(output) if request.render => request.with_render_target(output),
        _ => request,
    })
}

fn execute(
    dispatcher: &OcrDispatcher,
    image_path: &Path,
    request: &OcrRequest,
    output: Option<&Path>,
    out: &mut impl Write,
) -> Result<()> {
    let image = normalize(ImageSource::Path(image_path.to_path_buf()))?;
    let workspace = request.render.then(TempWorkspace::new).transpose()?;

    let started = Instant::now();
    let result = dispatcher.run(&image, request, workspace.as_ref())?;
    info!(
        rendered = result.is_rendered(),
        "Processed {} in {:.2?}",
        image_path.display(),
        started.elapsed()
    );
    if let Some(workspace) = workspace {
        workspace.close()?;
    }

    match output {
        Some(path) => {
            fs::write(path, result.as_str())
                .with_context(|| format!("failed to write results to {}", path.display()))?;
            writeln!(out, "Results saved to {}", path.display())?;
        }
        None => writeln!(out, "{result}")?,
    }
    Ok(())
}
