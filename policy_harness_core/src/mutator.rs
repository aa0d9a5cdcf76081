use crate::classifier::{ARGV_KEY, ENV_KEY, PLUGIN_ARG_KEYS, USER_INFO_KEYS};
use crate::corpus::Corpus;
use crate::input::Input;
use rand::Rng;
use rand::seq::IndexedRandom;

/// Settings keys the plugin is known to read.
const SETTING_KEYS: &[&str] = &[
    "runas_user=",
    "runas_group=",
    "progname=",
    "network_addrs=",
    "login_class=",
    "closefrom=",
    "max_groups=",
    "plugin_dir=",
];

/// Values worth pairing with any key.
const INTERESTING_VALUES: &[&str] = &[
    "",
    "0",
    "-1",
    "4294967296",
    "0777",
    "root",
    "/",
    "/bin/sh",
    "%s%s%n",
    "a,b,,c",
    "=",
    "\u{7f}",
];

/// Transforms an input into a new one.
pub trait Mutator<I: Input, R: Rng + ?Sized> {
    /// Mutates `input_opt`, or generates from scratch when it is `None`.
    ///
    /// `corpus_opt` gives strategies that splice from other entries something to draw on.
    fn mutate(
        &mut self,
        input_opt: Option<&I>,
        rng: &mut R,
        corpus_opt: Option<&dyn Corpus<I>>,
    ) -> Result<I, anyhow::Error>;
}

/// The edit a [`LineMutator`] applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineMutation {
    FlipByte,
    InjectKeyLine,
    DuplicateLine,
    DropLine,
    SpliceLine,
}

impl LineMutation {
    pub const ALL: [LineMutation; 5] = [
        LineMutation::FlipByte,
        LineMutation::InjectKeyLine,
        LineMutation::DuplicateLine,
        LineMutation::DropLine,
        LineMutation::SpliceLine,
    ];
}

/// Mutates newline-delimited key/value inputs one record at a time.
#[derive(Debug, Default, Clone)]
pub struct LineMutator {
    last: Option<LineMutation>,
}

impl LineMutator {
    pub fn new() -> Self {
        Self::default()
    }

    /// The strategy used by the most recent call to `mutate`.
    pub fn last_mutation(&self) -> Option<LineMutation> {
        self.last
    }
}

fn split_lines(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes.split(|&b| b == b'\n').map(<[u8]>::to_vec).collect()
}

fn join_lines(lines: &[Vec<u8>]) -> Vec<u8> {
    lines.join(&b'\n')
}

fn random_key<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    let pools: [&[&'static str]; 4] = [
        PLUGIN_ARG_KEYS,
        USER_INFO_KEYS,
        &[ARGV_KEY, ENV_KEY],
        SETTING_KEYS,
    ];
    pools
        .choose(rng)
        .and_then(|pool| pool.choose(rng))
        .copied()
        .unwrap_or(ARGV_KEY)
}

fn key_line<R: Rng + ?Sized>(rng: &mut R) -> Vec<u8> {
    let key = random_key(rng);
    let value = INTERESTING_VALUES.choose(rng).copied().unwrap_or_default();
    let mut line = key.as_bytes().to_vec();
    line.extend_from_slice(value.as_bytes());
    line
}

fn flip_byte<R: Rng + ?Sized>(bytes: &mut Vec<u8>, rng: &mut R) {
    if bytes.is_empty() {
        bytes.push(0);
    }
    let index = rng.random_range(0..bytes.len());
    bytes[index] = bytes[index].wrapping_add(rng.random_range(1u8..=15u8));
}

impl LineMutator {
    fn apply<I, R>(
        &self,
        mutation: LineMutation,
        bytes: Vec<u8>,
        rng: &mut R,
        corpus_opt: Option<&dyn Corpus<I>>,
    ) -> Vec<u8>
    where
        I: Input,
        R: Rng + ?Sized,
    {
        let mut lines = split_lines(&bytes);
        match mutation {
            LineMutation::FlipByte => {
                let mut bytes = bytes;
                flip_byte(&mut bytes, rng);
                return bytes;
            }
            LineMutation::InjectKeyLine => {
                let at = rng.random_range(0..=lines.len());
                lines.insert(at, key_line(rng));
            }
            LineMutation::DuplicateLine => {
                let from = rng.random_range(0..lines.len());
                let at = rng.random_range(0..=lines.len());
                let line = lines[from].clone();
                lines.insert(at, line);
            }
            LineMutation::DropLine => {
                let at = rng.random_range(0..lines.len());
                lines.remove(at);
            }
            LineMutation::SpliceLine => {
                let donor = corpus_opt
                    .and_then(|corpus| {
                        let id = rng.random_range(0..corpus.len().max(1));
                        corpus.get(id)
                    })
                    .map(|input| split_lines(input.as_bytes()))
                    .and_then(|donor| donor.choose(rng).cloned());
                let line = donor.unwrap_or_else(|| key_line(rng));
                let at = rng.random_range(0..=lines.len());
                lines.insert(at, line);
            }
        }
        join_lines(&lines)
    }
}

impl<I, R> Mutator<I, R> for LineMutator
where
    I: Input + From<Vec<u8>>,
    R: Rng + ?Sized,
{
    fn mutate(
        &mut self,
        input_opt: Option<&I>,
        rng: &mut R,
        corpus_opt: Option<&dyn Corpus<I>>,
    ) -> Result<I, anyhow::Error> {
        let Some(input) = input_opt else {
            self.last = Some(LineMutation::InjectKeyLine);
            return Ok(I::from(key_line(rng)));
        };
        let mutation = *LineMutation::ALL
            .choose(rng)
            .ok_or_else(|| anyhow::anyhow!("no line mutations available"))?;
        self.last = Some(mutation);
        Ok(I::from(self.apply(
            mutation,
            input.as_bytes().to_vec(),
            rng,
            corpus_opt,
        )))
    }
}
