#![forbid(unsafe_code)]

//! Stromsborg CLI: streaming XML security operations (c14n, encrypt,
//! decrypt, sign, verify).

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use rsa::pkcs8::DecodePrivateKey;
use stromsborg::c14n::C14nMode;
use stromsborg::chain::{
    CollectingEventSink, RsaKeyToken, SecurityContext, SecurityEvent, SharedInputProcessor,
    SharedOutputProcessor, SymmetricKeyToken,
};
use stromsborg::core::{algorithm, Error, SecurityProperties};
use stromsborg::dsig::SignatureInputProcessor;
use stromsborg::enc::{DecryptInputProcessor, EncryptOutputProcessor, SecurePart};
use stromsborg::xml::{QName, XmlEventWriter};
use stromsborg::{signature_processors, InboundSecurity, OutboundSecurity};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const AES_TOKEN: &str = "aes-key";
const DES3_TOKEN: &str = "des3-key";
const HMAC_TOKEN: &str = "hmac-key";
const RSA_TOKEN: &str = "rsa-key";

#[derive(Parser)]
#[command(
    name = "stromsborg",
    about = "Stromsborg: streaming XML Security (XML-DSig, XML-Enc, C14N)",
    version
)]
struct Cli {
    /// Pipeline configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `stromsborg_enc=trace`
    #[arg(long = "log-level", global = true, default_value = "warn")]
    log_level: String,

    #[command(flatten)]
    keys: KeyArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct KeyArgs {
    /// Raw AES key (binary file)
    #[arg(long = "aes-key", global = true)]
    aes_key: Option<PathBuf>,

    /// Raw triple-DES key (binary file, 24 bytes)
    #[arg(long = "des3-key", global = true)]
    des3_key: Option<PathBuf>,

    /// Raw HMAC key (binary file)
    #[arg(long = "hmac-key", global = true)]
    hmac_key: Option<PathBuf>,

    /// RSA private key (PKCS#8 PEM)
    #[arg(long = "rsa-key", global = true)]
    rsa_key: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Canonicalize an XML document
    C14n {
        /// Input XML file
        file: PathBuf,

        /// Canonicalization algorithm URI (default: Exclusive C14N)
        #[arg(long)]
        algorithm: Option<String>,

        /// InclusiveNamespaces PrefixList for exclusive canonicalization
        #[arg(long = "prefix")]
        prefixes: Vec<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Encrypt elements of an XML document
    Encrypt {
        /// Input XML file
        file: PathBuf,

        /// Element to encrypt whole, as `{namespace}local` or `local`
        #[arg(long)]
        element: Vec<String>,

        /// Element whose content to encrypt, as `{namespace}local` or `local`
        #[arg(long)]
        content: Vec<String>,

        /// Block cipher URI (default from configuration)
        #[arg(long)]
        algorithm: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Decrypt every EncryptedData of an XML document
    Decrypt {
        /// Input XML file
        file: PathBuf,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sign elements of an XML document
    Sign {
        /// Input XML file
        file: PathBuf,

        /// Element to sign, as `{namespace}local` or `local`
        #[arg(long, required = true)]
        part: Vec<String>,

        /// Signature method URI (default: from the key given)
        #[arg(long)]
        algorithm: Option<String>,

        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Verify the signatures of an XML document
    Verify {
        /// Input XML file
        file: PathBuf,
    },

    /// List supported algorithms
    Info,
}

fn main() {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

    let result = load_properties(cli.config.as_deref()).and_then(|properties| match cli.command {
        Commands::C14n {
            file,
            algorithm,
            prefixes,
            output,
        } => cmd_c14n(file, algorithm, prefixes, output, &properties),
        Commands::Encrypt {
            file,
            element,
            content,
            algorithm,
            output,
        } => cmd_encrypt(file, element, content, algorithm, output, &cli.keys, properties),
        Commands::Decrypt { file, output } => cmd_decrypt(file, output, &cli.keys, properties),
        Commands::Sign {
            file,
            part,
            algorithm,
            output,
        } => cmd_sign(file, part, algorithm, output, &cli.keys, properties),
        Commands::Verify { file } => cmd_verify(file, &cli.keys, properties),
        Commands::Info => cmd_info(),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_properties(path: Option<&Path>) -> Result<SecurityProperties, Error> {
    match path {
        Some(path) => Ok(SecurityProperties::from_file(path)?),
        None => Ok(SecurityProperties::default()),
    }
}

fn cmd_c14n(
    file: PathBuf,
    uri: Option<String>,
    prefixes: Vec<String>,
    output: Option<PathBuf>,
    properties: &SecurityProperties,
) -> Result<(), Error> {
    let xml = read_file(&file)?;
    let uri = uri.unwrap_or_else(|| properties.default_c14n.clone());
    let mode = C14nMode::require(&uri)?;
    let canonical = stromsborg::c14n::canonicalize(&xml, mode, &prefixes)?;
    write_output(output, &canonical)
}

fn cmd_encrypt(
    file: PathBuf,
    element: Vec<String>,
    content: Vec<String>,
    cipher: Option<String>,
    output: Option<PathBuf>,
    keys: &KeyArgs,
    properties: SecurityProperties,
) -> Result<(), Error> {
    let mut parts: Vec<SecurePart> = element
        .iter()
        .map(|name| parse_qname(name).map(SecurePart::element))
        .collect::<Result<_, _>>()?;
    for name in &content {
        parts.push(SecurePart::content(parse_qname(name)?));
    }
    if parts.is_empty() {
        return Err(Error::Config("nothing to encrypt: give --element or --content".into()));
    }
    let cipher = cipher.unwrap_or_else(|| properties.default_encryption.clone());
    let token = if cipher == algorithm::TRIPLEDES_CBC {
        DES3_TOKEN
    } else {
        AES_TOKEN
    };

    let outbound = OutboundSecurity::new(properties, security_context(keys, None)?)?;
    let encrypt: SharedOutputProcessor =
        Arc::new(Mutex::new(EncryptOutputProcessor::new(parts, &cipher, token)));
    let xml = read_file(&file)?;
    let encrypted = outbound.transform_document(&xml, vec![encrypt])?;
    write_output(output, encrypted.as_bytes())
}

fn cmd_decrypt(
    file: PathBuf,
    output: Option<PathBuf>,
    keys: &KeyArgs,
    properties: SecurityProperties,
) -> Result<(), Error> {
    let inbound = InboundSecurity::new(properties, security_context(keys, None)?)?;
    let mut decrypt = DecryptInputProcessor::all();
    if keys.aes_key.is_some() {
        decrypt = decrypt.with_default_token(AES_TOKEN);
    } else if keys.des3_key.is_some() {
        decrypt = decrypt.with_default_token(DES3_TOKEN);
    }
    let decrypt: SharedInputProcessor = Arc::new(Mutex::new(decrypt));
    let reader = inbound.process_reader(open_file(&file)?, vec![decrypt])?;

    let mut writer = XmlEventWriter::new(Vec::new());
    for event in reader {
        writer.write_event(&event?)?;
    }
    write_output(output, &writer.into_inner()?)
}

fn cmd_sign(
    file: PathBuf,
    part: Vec<String>,
    method: Option<String>,
    output: Option<PathBuf>,
    keys: &KeyArgs,
    properties: SecurityProperties,
) -> Result<(), Error> {
    let parts = part
        .iter()
        .map(|name| parse_qname(name))
        .collect::<Result<Vec<_>, _>>()?;
    let (token, default_method) = match (&keys.hmac_key, &keys.rsa_key) {
        (_, Some(_)) => (RSA_TOKEN, algorithm::RSA_SHA256),
        (Some(_), None) => (HMAC_TOKEN, algorithm::HMAC_SHA256),
        (None, None) => return Err(Error::Config("signing needs --hmac-key or --rsa-key".into())),
    };
    let method = method.unwrap_or_else(|| default_method.to_owned());

    let processors = signature_processors(parts, &properties, &method, token)?;
    let outbound = OutboundSecurity::new(properties, security_context(keys, None)?)?;
    let xml = read_file(&file)?;
    let signed = outbound.transform_document(&xml, processors)?;
    write_output(output, signed.as_bytes())
}

fn cmd_verify(file: PathBuf, keys: &KeyArgs, properties: SecurityProperties) -> Result<(), Error> {
    let sink = Arc::new(CollectingEventSink::new());
    let inbound = InboundSecurity::new(properties, security_context(keys, Some(sink.clone()))?)?;
    let verifier = Arc::new(Mutex::new(SignatureInputProcessor::new()));
    let shared: SharedInputProcessor = verifier.clone();
    let reader = inbound.process_reader(open_file(&file)?, vec![shared])?;
    for event in reader {
        event?;
    }

    let verified = verifier
        .lock()
        .map_err(|_| Error::InternalFailure("verifier lock poisoned".into()))?
        .verified();
    if verified == 0 {
        eprintln!("INVALID: no signature found");
        process::exit(1);
    }
    for event in sink.take() {
        if let SecurityEvent::ElementSigned { element, reference } = event {
            eprintln!("signed: {element} (#{reference})");
        }
    }
    println!("OK");
    Ok(())
}

fn cmd_info() -> Result<(), Error> {
    println!("Stromsborg: streaming XML Security engine");
    println!();
    println!("Supported digest algorithms:");
    println!("  SHA-1, SHA-224, SHA-256, SHA-384, SHA-512, SHA3-256, SHA3-512");
    println!();
    println!("Supported signature algorithms:");
    println!("  RSA PKCS#1 v1.5 (SHA-1, SHA-256, SHA-384, SHA-512)");
    println!("  HMAC (SHA-1, SHA-256, SHA-384, SHA-512)");
    println!();
    println!("Supported encryption algorithms:");
    println!("  AES-128/192/256-CBC, 3DES-CBC");
    println!();
    println!("Supported canonicalization:");
    println!("  C14N 1.0 (±comments)");
    println!("  C14N 1.1 (±comments)");
    println!("  Exclusive C14N 1.0 (±comments)");
    println!();
    println!("Key options:");
    println!("  --aes-key, --des3-key, --hmac-key (raw binary), --rsa-key (PKCS#8 PEM)");
    Ok(())
}

// ── Utility functions ────────────────────────────────────────────────

fn security_context(
    keys: &KeyArgs,
    sink: Option<Arc<CollectingEventSink>>,
) -> Result<SecurityContext, Error> {
    let mut ctx = SecurityContext::default();
    if let Some(sink) = sink {
        ctx = ctx.with_event_sink(sink);
    }
    for (path, id) in [
        (&keys.aes_key, AES_TOKEN),
        (&keys.des3_key, DES3_TOKEN),
        (&keys.hmac_key, HMAC_TOKEN),
    ] {
        if let Some(path) = path {
            let bytes = std::fs::read(path)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
            ctx.register_token(Arc::new(SymmetricKeyToken::new(id, bytes)))?;
        }
    }
    if let Some(path) = &keys.rsa_key {
        let pem = read_file(path)?;
        let key = rsa::RsaPrivateKey::from_pkcs8_pem(&pem)
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        ctx.register_token(Arc::new(RsaKeyToken::new(RSA_TOKEN, key)))?;
    }
    Ok(ctx)
}

/// `{namespace}local` or a bare local name.
fn parse_qname(text: &str) -> Result<QName, Error> {
    match text.strip_prefix('{') {
        Some(rest) => {
            let (uri, local) = rest
                .split_once('}')
                .ok_or_else(|| Error::Config(format!("invalid element name: {text}")))?;
            if local.is_empty() {
                return Err(Error::Config(format!("invalid element name: {text}")));
            }
            Ok(QName::new(uri, local))
        }
        None => Ok(QName::local(text)),
    }
}

fn read_file(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

fn open_file(path: &Path) -> Result<BufReader<File>, Error> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}

fn write_output(path: Option<PathBuf>, data: &[u8]) -> Result<(), Error> {
    match path {
        Some(p) => std::fs::write(&p, data).map_err(Error::Io),
        None => {
            use std::io::Write;
            let mut stdout = std::io::stdout();
            stdout.write_all(data)?;
            stdout.flush()?;
            Ok(())
        }
    }
}
