//! Builtins registry
//!
//! Process-level mapping from case-folded name ids to native functions,
//! populated at interpreter initialization. Name resolution falls back to
//! this table after the scope chain misses.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Nonce};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use parking_lot::{Mutex, RwLock};
use rand::RngCore;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::sync::Arc;
use vestnik_core::names::{self, NameId};
use vestnik_core::{Func, Value, VmError, VmResult, VmTime};

/// Shared output sink of the engine; `Сообщить` writes here.
pub type Output = Arc<Mutex<dyn Write + Send>>;

/// Engine-level encryption key for the crypto builtins.
const AES_KEY: &[u8; 16] = b"vstnkEngineKey01";

/// Nonce length of AES-GCM; ciphertexts carry the nonce as a prefix.
const NONCE_LEN: usize = 12;

/// Registry of native functions keyed by case-folded name id.
pub struct Builtins {
    table: RwLock<FxHashMap<NameId, Arc<Func>>>,
}

impl Builtins {
    /// Empty registry.
    pub fn new() -> Self {
        Builtins {
            table: RwLock::new(FxHashMap::default()),
        }
    }

    /// Registry pre-populated with the standard set.
    pub fn standard(output: Output) -> Self {
        let b = Builtins::new();
        b.register(message_fn(output));
        b.register(Func::native("ТекущаяДата", |args, rets| {
            if !args.is_empty() {
                return Err(VmError::ArityMismatch {
                    got: args.len(),
                    want: 0,
                });
            }
            rets.push(Value::Time(VmTime::now()));
            Ok(())
        }));
        b.register(Func::native("Длина", |args, rets| {
            let [arg] = args else {
                return Err(VmError::ArityMismatch {
                    got: args.len(),
                    want: 1,
                });
            };
            let len = match arg {
                Value::String(s) => s.chars().count(),
                Value::Slice(items) => items.read().len(),
                Value::Map(entries) => entries.read().len(),
                _ => return Err(VmError::TypeMismatch),
            };
            rets.push(Value::Int(len as i64));
            Ok(())
        }));
        b.register(Func::native("Хэш", |args, rets| {
            let s = one_string(args)?;
            let digest = Sha256::digest(s.as_bytes());
            rets.push(Value::string(to_hex(&digest[..8])));
            Ok(())
        }));
        b.register(Func::native("Закрыть", |args, rets| {
            let [Value::Chan(chan)] = args else {
                return Err(VmError::TypeMismatch);
            };
            chan.close();
            let _ = rets;
            Ok(())
        }));
        b.register(Func::native("Шифровать", |args, rets| {
            let s = one_string(args)?;
            rets.push(Value::string(to_hex(&encrypt(s.as_bytes())?)));
            Ok(())
        }));
        b.register(Func::native("Расшифровать", |args, rets| {
            let s = one_string(args)?;
            let plain = decrypt(&from_hex(&s)?)?;
            let text = String::from_utf8(plain)
                .map_err(|_| VmError::Parse("не текст UTF-8".into()))?;
            rets.push(Value::string(text));
            Ok(())
        }));
        b.register(Func::native("Сжать", |args, rets| {
            let s = one_string(args)?;
            rets.push(Value::string(to_hex(&compress(s.as_bytes())?)));
            Ok(())
        }));
        b.register(Func::native("Распаковать", |args, rets| {
            let s = one_string(args)?;
            let plain = decompress(&from_hex(&s)?)?;
            let text = String::from_utf8(plain)
                .map_err(|_| VmError::Parse("не текст UTF-8".into()))?;
            rets.push(Value::string(text));
            Ok(())
        }));
        b
    }

    /// Register a native under the case-folded id of its name.
    pub fn register(&self, func: Func) {
        let key = names::lower_id(func.name);
        self.table.write().insert(key, Arc::new(func));
    }

    /// Look up by case-folded name id.
    pub fn get(&self, lower: NameId) -> Option<Arc<Func>> {
        self.table.read().get(&lower).cloned()
    }
}

impl Default for Builtins {
    fn default() -> Self {
        Self::new()
    }
}

/// `Сообщить`: print the textual forms of the arguments, space-separated,
/// with a trailing newline.
fn message_fn(output: Output) -> Func {
    Func::native("Сообщить", move |args, _rets| {
        let line = args
            .iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(" ");
        let mut w = output.lock();
        writeln!(w, "{}", line).map_err(|e| VmError::Runtime(e.to_string()))?;
        Ok(())
    })
}

fn one_string(args: &[Value]) -> VmResult<Arc<str>> {
    match args {
        [Value::String(s)] => Ok(s.clone()),
        [_] => Err(VmError::TypeMismatch),
        _ => Err(VmError::ArityMismatch {
            got: args.len(),
            want: 1,
        }),
    }
}

fn encrypt(plain: &[u8]) -> VmResult<Vec<u8>> {
    let cipher = Aes128Gcm::new(AES_KEY.into());
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plain)
        .map_err(|_| VmError::Runtime("ошибка шифрования".into()))?;
    let mut out = nonce.to_vec();
    out.extend_from_slice(&sealed);
    Ok(out)
}

fn decrypt(data: &[u8]) -> VmResult<Vec<u8>> {
    if data.len() < NONCE_LEN {
        return Err(VmError::SmallDecodeBuffer);
    }
    let (nonce, sealed) = data.split_at(NONCE_LEN);
    let cipher = Aes128Gcm::new(AES_KEY.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| VmError::Parse("данные не расшифровываются".into()))
}

fn compress(data: &[u8]) -> VmResult<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::fast());
    encoder
        .write_all(data)
        .map_err(|e| VmError::Runtime(e.to_string()))?;
    encoder.finish().map_err(|e| VmError::Runtime(e.to_string()))
}

fn decompress(data: &[u8]) -> VmResult<Vec<u8>> {
    let mut out = Vec::new();
    DeflateDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| VmError::Parse(e.to_string()))?;
    Ok(out)
}

fn to_hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

fn from_hex(s: &str) -> VmResult<Vec<u8>> {
    if s.len() % 2 != 0 || !s.is_ascii() {
        return Err(VmError::Parse("не шестнадцатеричная строка".into()));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|_| VmError::Parse("не шестнадцатеричная строка".into()))
        })
        .collect()
}
