//! A one-shot result slot that can wake a task.
//!
//! Single-producer in practice (the first `set` wins, later ones are ignored), any number of
//! readers, and usable as a `Future` which resolves to the published value. This is the
//! single-assignment half of a promise, without the channel machinery of `oneshot`: reading does
//! not consume the value, which is what lets a wait be retried or polled without racing.

use std::{
	pin::Pin,
	sync::{Arc, OnceLock},
};

use futures::{
	future::Future,
	task::{AtomicWaker, Context, Poll},
};

#[derive(Debug)]
struct Inner<T> {
	waker: AtomicWaker,
	value: OnceLock<T>,
}

#[derive(Debug)]
pub(crate) struct OnceSlot<T>(Arc<Inner<T>>);

impl<T> Clone for OnceSlot<T> {
	fn clone(&self) -> Self {
		Self(Arc::clone(&self.0))
	}
}

impl<T> Default for OnceSlot<T> {
	fn default() -> Self {
		Self(Arc::new(Inner {
			waker: AtomicWaker::new(),
			value: OnceLock::new(),
		}))
	}
}

impl<T: Copy> OnceSlot<T> {
	/// Whether a value has been published.
	pub fn is_set(&self) -> bool {
		self.0.value.get().is_some()
	}

	/// Publish the value and wake any waiting task.
	///
	/// Only the first call has any effect.
	pub fn set(&self, value: T) {
		let _ = self.0.value.set(value);
		self.0.waker.wake();
	}
}

impl<T: Copy> Future for OnceSlot<T> {
	type Output = T;

	fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
		// quick check to avoid registration if already done.
		if let Some(value) = self.0.value.get() {
			return Poll::Ready(*value);
		}

		self.0.waker.register(cx.waker());

		// Need to check condition **after** `register` to avoid a race
		// condition that would result in lost notifications.
		if let Some(value) = self.0.value.get() {
			Poll::Ready(*value)
		} else {
			Poll::Pending
		}
	}
}

#[cfg(test)]
mod tests {
	use super::OnceSlot;

	#[test]
	fn starts_unset() {
		let slot = OnceSlot::<u32>::default();
		assert!(!slot.is_set());
	}

	#[test]
	fn first_set_wins() {
		let slot = OnceSlot::default();
		slot.set(1);
		slot.set(2);
		assert!(slot.is_set());
	}

	#[tokio::test]
	async fn resolves_to_published_value() {
		let slot = OnceSlot::default();
		let reader = slot.clone();

		tokio::spawn(async move {
			slot.set(7u32);
		});

		assert_eq!(reader.clone().await, 7);
		// reading does not consume: a second await sees the same value.
		assert_eq!(reader.await, 7);
	}
}
