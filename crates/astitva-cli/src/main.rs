use anyhow::{bail, Context, Result};
use astitva_core::Descriptor;
use astitva_hw::{FacingMode, MediaDevices, V4lCamera, V4lDevices, VideoStream};
use astitva_scan::{
    register_student_complete, AttendanceRequest, HttpBackend, NewStudent, ScanConfig,
    StudentBackend, StudentDetails,
};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "astitva", about = "Astitva attendance CLI", version)]
struct Cli {
    /// TOML config file (defaults to $ASTITVA_CONFIG)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List V4L2 capture devices
    Devices,
    /// Run camera diagnostics and save one still
    Test {
        /// Camera to test: user (front) or environment (rear)
        #[arg(long, default_value = "user")]
        facing: FacingMode,
        /// Where to write the captured JPEG
        #[arg(short, long, default_value = "astitva-test.jpg")]
        output: PathBuf,
        /// Frames to discard while exposure settles
        #[arg(long, default_value_t = 4)]
        warmup: usize,
    },
    /// Add a student record
    AddStudent {
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: String,
    },
    /// Upload face images for an existing student
    Enroll {
        #[arg(long)]
        id: String,
        /// JPEG images to enroll
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Register a student: add, attach details, enroll images
    Register {
        #[command(flatten)]
        student: StudentArgs,
        /// JSON file holding the face descriptors, an array of number arrays
        #[arg(long)]
        descriptors: PathBuf,
        /// JPEG images to enroll
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
    /// Mark attendance for a verified student
    MarkAttendance {
        #[arg(long)]
        id: String,
        #[arg(long)]
        lecture: i64,
        /// Match confidence in percent
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        confidence: u8,
    },
    /// List students and their enrolled descriptors
    Students,
    /// Print the effective configuration
    Config,
}

#[derive(Args)]
struct StudentArgs {
    #[arg(long)]
    id: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    department: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    phone: Option<String>,
    #[arg(long)]
    year: Option<String>,
}

impl From<StudentArgs> for StudentDetails {
    fn from(args: StudentArgs) -> Self {
        StudentDetails {
            student_id: args.id,
            full_name: args.name,
            department: args.department,
            email: args.email,
            phone: args.phone,
            year: args.year,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = ScanConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Devices => list_devices(),
        Commands::Test {
            facing,
            output,
            warmup,
        } => camera_test(&config, facing, &output, warmup).await?,
        Commands::AddStudent { id, name } => {
            let backend = backend(&config)?;
            let response = backend
                .add_student(&NewStudent {
                    student_id: id,
                    full_name: name,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Enroll { id, images } => {
            let backend = backend(&config)?;
            for path in images {
                let jpeg = read_image(&path)?;
                match backend.enroll_face(&id, jpeg).await {
                    Ok(_) => println!("enrolled {}", path.display()),
                    Err(e) => eprintln!("failed to enroll {}: {e}", path.display()),
                }
            }
        }
        Commands::Register {
            student,
            descriptors,
            images,
        } => {
            let descriptors = read_descriptors(&descriptors)?;
            let backend = backend(&config)?;
            let images = images
                .iter()
                .map(|p| read_image(p))
                .collect::<Result<Vec<_>>>()?;
            let details = StudentDetails::from(student);
            let receipt = register_student_complete(&backend, &details, images, descriptors).await?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
            if receipt.failed_enrollments > 0 {
                eprintln!(
                    "warning: {} of {} face images were not enrolled",
                    receipt.failed_enrollments,
                    receipt.enrolled + receipt.failed_enrollments
                );
            }
        }
        Commands::MarkAttendance {
            id,
            lecture,
            confidence,
        } => {
            let backend = backend(&config)?;
            let response = backend
                .mark_attendance(&AttendanceRequest::facial(id, lecture, confidence))
                .await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Students => {
            let backend = backend(&config)?;
            let students = backend.list_students().await?;
            if students.is_empty() {
                println!("No students registered");
            }
            for s in &students {
                println!(
                    "{:<14} {:<28} {} descriptor(s)",
                    s.student_id,
                    s.full_name,
                    s.face_descriptors.len()
                );
            }
        }
        Commands::Config => {
            let mut shown = config.clone();
            if shown.backend_token.is_some() {
                shown.backend_token = Some("<redacted>".to_string());
            }
            print!("{}", toml::to_string_pretty(&shown)?);
        }
    }

    Ok(())
}

fn backend(config: &ScanConfig) -> Result<HttpBackend> {
    HttpBackend::new(
        config.backend_url.clone(),
        config.backend_token.clone(),
        config.backend_timeout(),
    )
    .context("failed to build backend client")
}

fn read_image(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_descriptors(path: &Path) -> Result<Vec<Descriptor>> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let descriptors: Vec<Descriptor> =
        serde_json::from_str(&text).with_context(|| format!("{} is not a descriptor array", path.display()))?;
    if Descriptor::common_len(&descriptors).is_none() {
        bail!(
            "{} must hold at least one descriptor, all of the same non-zero length",
            path.display()
        );
    }
    Ok(descriptors)
}

fn list_devices() {
    let devices = V4lCamera::list_devices();
    if devices.is_empty() {
        println!("No V4L2 capture devices found");
        return;
    }
    for d in devices {
        println!("{:<14} {:<32} {} ({})", d.path, d.name, d.driver, d.bus);
    }
}

async fn camera_test(config: &ScanConfig, facing: FacingMode, output: &Path, warmup: usize) -> Result<()> {
    let devices = V4lDevices::new(config.front_camera.clone(), config.rear_camera.clone());
    let device = devices.device_for(facing)?.to_string();
    println!("Opening {device} ({facing})...");

    let stream = match devices.open(facing, config.resolution()).await {
        Ok(stream) => stream,
        Err(e) if e.is_permission_denied() => {
            eprintln!("Permission denied. Is your user in the 'video' group?");
            return Err(e.into());
        }
        Err(e) => return Err(e).context(format!("failed to open {device}")),
    };

    for _ in 0..warmup {
        if let Err(e) = stream.grab_frame().await {
            tracing::debug!(error = %e, "warmup frame failed");
        }
    }

    let frame = stream.grab_frame().await.context("failed to capture frame")?;
    let frame = if facing.is_mirrored() {
        frame.mirrored()
    } else {
        frame
    };
    println!(
        "  {}x{}  brightness {:.1}  {}",
        frame.width,
        frame.height,
        frame.avg_brightness(),
        if frame.is_dark { "DARK" } else { "ok" }
    );

    let jpeg = frame.to_jpeg(config.jpeg_quality)?;
    std::fs::write(output, &jpeg).with_context(|| format!("failed to write {}", output.display()))?;
    println!("Saved {} ({} bytes)", output.display(), jpeg.len());

    stream.stop();
    Ok(())
}
