use std::{fs::File, io::Write, path::PathBuf};

use structopt::StructOpt;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use simplesoap_codegen as codegen;
use simplesoap_util::soap::signature;
use simplesoap_wsdl::{self as wsdl, types::SoapVersion, DefaultFetcher, FileCache, ServerDialect, Services};

#[derive(Debug, Error)]
enum Error {
    #[error("Error parsing WSDL")]
    ParseError(#[from] wsdl::Error),

    #[error("Generated code does not parse")]
    SyntaxError(#[from] syn::Error),

    #[error("Error writing output")]
    IoError(#[from] std::io::Error),
}

#[derive(StructOpt)]
#[structopt(about = "Generate and inspect SOAP clients from WSDL descriptions")]
enum Args {
    /// Writes Rust bindings for every service port of a WSDL
    Generate {
        #[structopt(short, long, default_value = "./output.rs")]
        output: PathBuf,

        input: String,
    },

    /// Lists services, ports and operation signatures of a WSDL
    Inspect {
        /// One of default, dotnet, jetty, axis, jbossas6, oracle
        #[structopt(short, long, default_value = "default")]
        dialect: ServerDialect,

        /// Keeps parsed descriptions in this directory
        #[structopt(long)]
        cache_dir: Option<PathBuf>,

        input: String,
    },
}

fn generate(input: &str, output: &PathBuf) -> Result<(), Error> {
    let tokens = codegen::from_url(input)?;
    let file = syn::parse2::<syn::File>(tokens)?;

    let mut out = File::create(output)?;
    write!(&mut out, "{}", prettyplease::unparse(&file))?;
    info!(output = %output.display(), "bindings written");
    Ok(())
}

fn describe(services: &Services, out: &mut impl Write) -> std::io::Result<()> {
    for service in services.services.values() {
        writeln!(out, "Service {}", service.name)?;
        if let Some(documentation) = &service.documentation {
            writeln!(out, "  {}", documentation)?;
        }

        for port in service.ports.values() {
            let version = match port.soap_version {
                Some(SoapVersion::Soap11) => "SOAP 1.1",
                Some(SoapVersion::Soap12) => "SOAP 1.2",
                None => "no SOAP binding",
            };
            writeln!(
                out,
                "  Port {} ({}) at {}",
                port.name,
                version,
                port.location.as_deref().unwrap_or("<no address>")
            )?;

            for operation in port.operations.values() {
                let inputs: Vec<String> = services
                    .input_fields(operation)
                    .iter()
                    .map(|field| format!("{}: {}", field.name, signature(&services.types, &field.descriptor)))
                    .collect();
                let output = operation
                    .output
                    .as_ref()
                    .map(|part| signature(&services.types, &part.descriptor))
                    .unwrap_or_else(|| "()".to_owned());
                writeln!(out, "    {}({}) -> {}", operation.name, inputs.join(", "), output)?;
                if let Some(action) = &operation.action {
                    writeln!(out, "      SOAPAction: {}", action)?;
                }
            }
        }
    }
    Ok(())
}

fn inspect(input: &str, dialect: &ServerDialect, cache_dir: Option<PathBuf>) -> Result<(), Error> {
    let fetcher = DefaultFetcher::default();
    let services = match cache_dir {
        Some(directory) => wsdl::parse_cached(input, &fetcher, dialect, &FileCache::new(directory))?,
        None => wsdl::parse_with(input, &fetcher, dialect)?,
    };

    describe(&services, &mut std::io::stdout().lock())?;
    Ok(())
}

#[paw::main]
fn main(args: Args) -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match args {
        Args::Generate { output, input } => generate(&input, &output),
        Args::Inspect {
            dialect,
            cache_dir,
            input,
        } => inspect(&input, &dialect, cache_dir),
    }
}
