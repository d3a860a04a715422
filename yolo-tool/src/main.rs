use anyhow::{ensure, Result};
use clap::Parser;
use label::Vocabulary;
use log::info;
use prettytable::{cell, row, Table};
use std::path::{Path, PathBuf};
use yolo_dl::{
    config::{Options, OptionsInit},
    grid::InputSize,
    weights::WeightsReader,
};

#[derive(Debug, Clone, Parser)]
enum Opts {
    /// Write default detector options for a label vocabulary.
    OptionsInit {
        /// names file, one label per line
        #[clap(long)]
        names: PathBuf,
        /// output options file
        #[clap(long)]
        output: PathBuf,
        /// square network input size
        #[clap(long)]
        input_size: Option<usize>,
        /// overwrite an existing output file
        #[clap(long)]
        force: bool,
    },
    /// Validate and print an options file.
    OptionsInfo {
        /// options file
        options_file: PathBuf,
    },
    /// Print the header of a darknet weights file.
    WeightsInfo {
        /// weights file
        weights_file: PathBuf,
    },
}

fn main() -> Result<()> {
    pretty_env_logger::init();

    match Opts::parse() {
        Opts::OptionsInit {
            names,
            output,
            input_size,
            force,
        } => {
            options_init(names, output, input_size, force)?;
        }
        Opts::OptionsInfo { options_file } => {
            options_info(options_file)?;
        }
        Opts::WeightsInfo { weights_file } => {
            weights_info(weights_file)?;
        }
    }

    Ok(())
}

fn options_init(
    names_file: impl AsRef<Path>,
    output_file: impl AsRef<Path>,
    input_size: Option<usize>,
    force: bool,
) -> Result<()> {
    let output_file = output_file.as_ref();
    ensure!(
        force || !output_file.exists(),
        "'{}' already exists, pass --force to overwrite it",
        output_file.display()
    );

    let vocabulary = Vocabulary::load(names_file)?;
    let options = OptionsInit {
        input_size: input_size.map(InputSize::square),
        ..OptionsInit::new(vocabulary)
    }
    .build()?;
    options.save(output_file)?;

    info!(
        "wrote options with {} classes to '{}'",
        options.num_classes(),
        output_file.display()
    );
    Ok(())
}

fn options_info(options_file: impl AsRef<Path>) -> Result<()> {
    let options = Options::load(options_file)?;
    let inference = options.yolo_inference()?;

    // print scalar settings
    {
        let mut table = Table::new();
        table.add_row(row!["option", "value"]);
        table.add_row(row![
            "input size",
            format!("{}x{}", options.input_size.h, options.input_size.w)
        ]);
        table.add_row(row!["classes", options.num_classes()]);
        table.add_row(row!["confidence threshold", options.confidence_threshold]);
        table.add_row(row!["nms iou threshold", options.nms_iou_threshold]);
        table.add_row(row!["class aware nms", options.class_aware_nms]);
        table.add_row(row!["ignore iou threshold", options.ignore_iou_threshold]);
        table.add_row(row![
            "truth match iou threshold",
            options.truth_match_iou_threshold
        ]);
        table.add_row(row!["size transform", format!("{:?}", options.size_transform)]);
        table.add_row(row!["center scale", options.center_scale]);
        table.add_row(row!["box loss", format!("{:?}", options.box_loss)]);
        table.add_row(row!["box gradient clip", options.box_gradient_clip]);
        table.add_row(row![
            "unmatched truth",
            format!("{:?}", options.unmatched_truth)
        ]);
        table.add_row(row!["loss weights", format!("{:?}", options.loss_weights)]);
        table.add_row(row!["normalize by batch", options.normalize_by_batch]);
        table.printstd();
    }

    // print anchors and expected feature shapes
    {
        let mut table = Table::new();
        table.add_row(row!["stride", "anchors", "feature shape"]);

        let shapes = inference.decoder().feature_shapes()?;
        options
            .anchors
            .scales()
            .iter()
            .zip(shapes)
            .for_each(|(scale, shape)| {
                let anchors: Vec<_> = scale
                    .anchors
                    .iter()
                    .map(|anchor| format!("({}, {})", anchor.width, anchor.height))
                    .collect();
                table.add_row(row![
                    scale.stride,
                    anchors.join(" "),
                    format!("{:?}", shape)
                ]);
            });

        table.printstd();
    }

    // print vocabulary
    {
        let mut table = Table::new();
        table.add_row(row!["class", "label"]);
        options
            .vocabulary
            .iter()
            .enumerate()
            .for_each(|(index, label)| {
                table.add_row(row![index, label]);
            });
        table.printstd();
    }

    Ok(())
}

fn weights_info(weights_file: impl AsRef<Path>) -> Result<()> {
    let reader = WeightsReader::open(weights_file)?;
    let header = *reader.header();
    let num_floats = reader.num_floats()?;

    let mut table = Table::new();
    table.add_row(row!["field", "value"]);
    table.add_row(row![
        "version",
        format!(
            "{}.{}.{}",
            header.version.major, header.version.minor, header.version.revision
        )
    ]);
    table.add_row(row!["seen", header.seen]);
    table.add_row(row!["parameters", num_floats]);
    table.printstd();

    Ok(())
}
