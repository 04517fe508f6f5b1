//! Tampon circulaire d'octets entre le thread d'émulation et le callback audio
//!
//! Un seul producteur (le thread d'émulation, via le connecteur) et un seul
//! consommateur (le callback du périphérique de sortie). Les curseurs de
//! lecture et d'écriture sont des compteurs atomiques qui ne font que croître :
//! l'occupation vaut toujours `head - tail`, entre 0 et la capacité.
//!
//! Politique volontairement avec pertes : une écriture qui déborde ou une
//! lecture qui manque de données vide le tampon au lieu d'échouer partiellement.
//! Vider le tampon revient à amener `tail` sur `head` par compare-and-swap ; une
//! lecture dont le `tail` a bougé entre-temps est abandonnée.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use log::{error, warn};
use memmap2::MmapMut;

use crate::error::AudioError;

/// Granularité d'allocation de la mémoire virtuelle
pub const PAGE_SIZE: usize = 4096;

/// Arrondit une taille au multiple de page supérieur
pub fn round_to_page(size: usize) -> Option<usize> {
    size.checked_add(PAGE_SIZE - 1)
        .map(|rounded| rounded & !(PAGE_SIZE - 1))
}

/// Tampon circulaire à capacité fixe
pub struct RingBuffer {
    /// Zone anonyme mappée, jamais relue par `Deref` après la construction
    _mapping: MmapMut,

    /// Début de la zone, vue comme des octets atomiques
    base: NonNull<AtomicU8>,

    /// Capacité en octets (multiple de page)
    capacity: usize,

    /// Total des octets écrits ; modifié par le seul producteur
    head: AtomicUsize,

    /// Total des octets consommés ou abandonnés
    tail: AtomicUsize,

    /// Lectures et écritures actives
    enabled: AtomicBool,

    stats: RingBufferStats,
}

// SAFETY: la zone mappée n'est lue et écrite qu'au travers d'`AtomicU8`, et
// reste valide tant que `_mapping` vit, c'est-à-dire tant que `self` vit.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Alloue un tampon d'au moins `preferred_size` octets
    ///
    /// Un échec d'allocation est fatal pour le pipeline : aucune capacité
    /// réduite n'est proposée à la place.
    pub fn new(preferred_size: usize) -> Result<Self, AudioError> {
        let allocation_error = || AudioError::RingBufferAllocation {
            requested: preferred_size,
        };

        if preferred_size == 0 {
            return Err(allocation_error());
        }

        let capacity = round_to_page(preferred_size).ok_or_else(allocation_error)?;

        let mut mapping = MmapMut::map_anon(capacity).map_err(|err| {
            error!("Allocation de {} octets impossible: {}", capacity, err);
            allocation_error()
        })?;

        let base = NonNull::new(mapping.as_mut_ptr().cast::<AtomicU8>())
            .ok_or_else(allocation_error)?;

        Ok(Self {
            _mapping: mapping,
            base,
            capacity,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            enabled: AtomicBool::new(true),
            stats: RingBufferStats::default(),
        })
    }

    /// Capacité totale en octets
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Octets disponibles pour la lecture
    pub fn available_for_reading(&self) -> usize {
        // `tail` d'abord : `head` relu ensuite ne peut pas lui être inférieur
        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        head.wrapping_sub(tail).min(self.capacity)
    }

    /// Octets libres pour l'écriture
    pub fn available_for_writing(&self) -> usize {
        self.capacity - self.available_for_reading()
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Active ou désactive le tampon sans le libérer
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    pub fn stats(&self) -> &RingBufferStats {
        &self.stats
    }

    /// Écrit `data` dans le tampon (producteur unique)
    ///
    /// Si la place manque, le contenu en attente est abandonné avant l'écriture.
    /// Retourne le nombre d'octets écrits (0 si le tampon est désactivé).
    pub fn write(&self, data: &[u8]) -> usize {
        if !self.is_enabled() || data.is_empty() {
            return 0;
        }

        if data.len() > self.available_for_writing() {
            warn!(
                "Tampon audio plein. Disponible: {}. Demandé: {}. Capacité: {}.",
                self.available_for_writing(),
                data.len(),
                self.capacity
            );
            self.stats.overruns.fetch_add(1, Ordering::Relaxed);
            self.reset();
        }

        // Un `tail` périmé ne fait que sous-estimer la place libre
        let size = data.len().min(self.available_for_writing());
        let head = self.head.load(Ordering::Relaxed);
        self.copy_in(head % self.capacity, &data[..size]);

        self.head.store(head.wrapping_add(size), Ordering::Release);
        self.stats.bytes_written.fetch_add(size as u64, Ordering::Relaxed);

        size
    }

    /// Lit jusqu'à `into.len()` octets (consommateur unique)
    ///
    /// Si le tampon contient moins que demandé, il est vidé et rien n'est lu.
    /// Appelé depuis le callback de sortie : aucun log, seulement des compteurs.
    pub fn read(&self, into: &mut [u8]) -> usize {
        if !self.is_enabled() || into.is_empty() {
            return 0;
        }

        let tail = self.tail.load(Ordering::Acquire);
        let head = self.head.load(Ordering::Acquire);
        let available = head.wrapping_sub(tail);
        if available == 0 {
            return 0;
        }

        if into.len() > available {
            self.stats.underruns.fetch_add(1, Ordering::Relaxed);
            // Échec : une remise à zéro concurrente a déjà vidé le tampon
            let _ = self
                .tail
                .compare_exchange(tail, head, Ordering::AcqRel, Ordering::Acquire);
            return 0;
        }

        let size = into.len();
        self.copy_out(tail % self.capacity, into);

        if self
            .tail
            .compare_exchange(tail, tail.wrapping_add(size), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Le tampon a été vidé pendant la copie : octets possiblement écrasés
            self.stats.discarded_reads.fetch_add(1, Ordering::Relaxed);
            return 0;
        }

        self.stats.bytes_read.fetch_add(size as u64, Ordering::Relaxed);
        size
    }

    /// Abandonne instantanément tout le contenu en attente
    ///
    /// Utilisable depuis n'importe quel thread.
    pub fn reset(&self) {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);
            if head == tail
                || self
                    .tail
                    .compare_exchange(tail, head, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                return;
            }
        }
    }

    fn bytes(&self) -> &[AtomicU8] {
        // SAFETY: `base` pointe sur `capacity` octets mappés, initialisés à zéro
        // par le système et vivants aussi longtemps que `self`.
        unsafe { std::slice::from_raw_parts(self.base.as_ptr(), self.capacity) }
    }

    fn copy_in(&self, offset: usize, data: &[u8]) {
        let bytes = self.bytes();
        let first = data.len().min(self.capacity - offset);

        for (slot, &byte) in bytes[offset..offset + first].iter().zip(&data[..first]) {
            slot.store(byte, Ordering::Relaxed);
        }
        for (slot, &byte) in bytes.iter().zip(&data[first..]) {
            slot.store(byte, Ordering::Relaxed);
        }
    }

    fn copy_out(&self, offset: usize, into: &mut [u8]) {
        let bytes = self.bytes();
        let first = into.len().min(self.capacity - offset);
        let (head, wrapped) = into.split_at_mut(first);

        for (byte, slot) in head.iter_mut().zip(&bytes[offset..offset + first]) {
            *byte = slot.load(Ordering::Relaxed);
        }
        for (byte, slot) in wrapped.iter_mut().zip(bytes) {
            *byte = slot.load(Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for RingBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuffer")
            .field("capacity", &self.capacity)
            .field("used", &self.available_for_reading())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

/// Compteurs de diagnostic du tampon
#[derive(Debug, Default)]
pub struct RingBufferStats {
    /// Écritures ayant provoqué une remise à zéro
    overruns: AtomicU64,

    /// Lectures ayant provoqué une remise à zéro
    underruns: AtomicU64,

    /// Lectures abandonnées après une remise à zéro concurrente
    discarded_reads: AtomicU64,

    bytes_written: AtomicU64,
    bytes_read: AtomicU64,
}

impl RingBufferStats {
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn discarded_reads(&self) -> u64 {
        self.discarded_reads.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }
}
