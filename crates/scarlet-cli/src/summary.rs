use std::path::Path;

use console::Style;
use scarlet_core::deblend::{DeblendConfig, DeblendOutput};
use scarlet_core::psf::DiffKernels;

use crate::scene_file::SceneSpec;

struct Styles {
    title: Style,
    header: Style,
    label: Style,
    value: Style,
    method: Style,
    good: Style,
    warn: Style,
    path: Style,
}

impl Styles {
    fn new() -> Self {
        Self {
            title: Style::new().cyan().bold(),
            header: Style::new().cyan().bold(),
            label: Style::new().dim(),
            value: Style::new().bold().white(),
            method: Style::new().green(),
            good: Style::new().green().bold(),
            warn: Style::new().dim().yellow(),
            path: Style::new().underlined(),
        }
    }
}

fn print_title(s: &Styles, title: &str) {
    println!();
    println!("  {}", s.title.apply_to(title));
    println!("  {}", s.title.apply_to("\u{2550}".repeat(title.chars().count())));
    println!();
}

pub fn print_deblend_summary(scene_path: &Path, spec: &SceneSpec, config: &DeblendConfig) {
    let s = Styles::new();
    print_title(&s, "Scarlet Deblend");

    println!(
        "  {:<14}{}",
        s.label.apply_to("Scene"),
        s.path.apply_to(scene_path.display())
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Size"),
        s.value.apply_to(format!(
            "{} bands, {}x{} px",
            spec.bands(),
            spec.height,
            spec.width
        ))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Sources"),
        s.value.apply_to(spec.sources.len())
    );
    match &spec.psf_sigmas {
        Some(sigmas) => println!(
            "  {:<14}{}",
            s.label.apply_to("PSF"),
            s.method.apply_to(format!("Gaussian {sigmas:?}"))
        ),
        None => println!(
            "  {:<14}{}",
            s.label.apply_to("PSF"),
            s.warn.apply_to("none")
        ),
    }
    println!();

    println!("  {}", s.header.apply_to("Components"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Box radius"),
        s.value.apply_to(format!("{} px", config.component.box_radius))
    );
    let constraints: Vec<String> = config
        .component
        .constraints
        .iter()
        .map(ToString::to_string)
        .collect();
    println!(
        "    {:<14}{}",
        s.label.apply_to("Constraints"),
        s.method.apply_to(constraints.join(", "))
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("SED"),
        s.method.apply_to(config.component.sed_constraint)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Min SNR"),
        s.value.apply_to(config.component.min_snr)
    );
    if config.garbage_collectors > 0 {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Collectors"),
            s.value.apply_to(config.garbage_collectors)
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Solver"));
    println!(
        "    {:<14}{}",
        s.label.apply_to("Max iter"),
        s.value.apply_to(config.fit.max_iter)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("e_rel"),
        s.value.apply_to(config.fit.e_rel)
    );
    println!(
        "    {:<14}{}",
        s.label.apply_to("Convolution"),
        s.method.apply_to(config.convolution)
    );
    if let Some(limit) = config.fit.time_limit_secs {
        println!(
            "    {:<14}{}",
            s.label.apply_to("Time limit"),
            s.value.apply_to(format!("{limit} s"))
        );
    }
    println!();
}

pub fn print_deblend_result(output: &DeblendOutput) {
    let s = Styles::new();
    let summary = &output.summary;
    print_title(&s, "Result");

    let state = if summary.converged {
        s.good.apply_to(summary.state.to_string())
    } else {
        s.warn.apply_to(summary.state.to_string())
    };
    println!("  {:<14}{}", s.label.apply_to("State"), state);
    println!(
        "  {:<14}{}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(summary.iterations)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Residual RMS"),
        s.value.apply_to(format!("{:.4e}", summary.residual_rms))
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Elapsed"),
        s.value.apply_to(format!("{:.1} ms", summary.elapsed.as_secs_f64() * 1000.0))
    );
    for peak in &output.skipped {
        println!(
            "  {:<14}{}",
            s.label.apply_to("Skipped"),
            s.warn.apply_to(format!("peak ({:.1}, {:.1})", peak.x, peak.y))
        );
    }
    println!();

    println!("  {}", s.header.apply_to("Components"));
    for (k, component) in output.blend.components().iter().enumerate() {
        let center = component.center();
        let sed: Vec<String> = component.sed().iter().map(|v| format!("{v:.3}")).collect();
        let flux = component.morphology().sum();
        println!(
            "    {:<4}{}  {}  {}",
            s.label.apply_to(k),
            s.value.apply_to(format!("({:.1}, {:.1})", center.x, center.y)),
            s.method.apply_to(format!("[{}]", sed.join(", "))),
            s.label.apply_to(format!("box {}  flux {flux:.3}", component.bbox()))
        );
    }
    println!();
}

pub fn print_psf_match_result(sigmas: &[f64], kernels: &DiffKernels) {
    let s = Styles::new();
    print_title(&s, "Difference Kernels");

    let state = if kernels.summary.converged {
        s.good.apply_to(kernels.summary.state.to_string())
    } else {
        s.warn.apply_to(kernels.summary.state.to_string())
    };
    println!("  {:<14}{}", s.label.apply_to("State"), state);
    println!(
        "  {:<14}{}",
        s.label.apply_to("Iterations"),
        s.value.apply_to(kernels.summary.iterations)
    );
    println!(
        "  {:<14}{}",
        s.label.apply_to("Residual RMS"),
        s.value.apply_to(format!("{:.4e}", kernels.summary.residual_rms))
    );
    println!();

    println!("  {}", s.header.apply_to("Bands"));
    let counts = kernels.nonzero_counts();
    for (b, (&sigma, count)) in sigmas.iter().zip(counts).enumerate() {
        let kernel = kernels.kernel(b);
        println!(
            "    {:<4}{}  {}  {}",
            s.label.apply_to(b),
            s.value.apply_to(format!("sigma {sigma:.2}")),
            s.method.apply_to(format!("{count} px")),
            s.label.apply_to(format!("sum {:.4}", kernel.sum()))
        );
    }
    println!();
}
