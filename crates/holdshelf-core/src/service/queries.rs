//! Catalog registration and read-only listings.

use tracing::info;

use super::ReservationService;
use crate::domain::{
    Book, BookId, Member, MemberId, Reservation, ReservationError, ReservationId,
    ReservationStatus,
};
use crate::observability::ReservationCounts;
use crate::ports::{Clock, EntityStore, ReservationFilter, ReservationOrder};

impl<S, C> ReservationService<S, C>
where
    S: EntityStore,
    C: Clock + Clone + 'static,
{
    /// Emails are unique; a second registration is a duplicate.
    pub fn register_member(
        &self,
        name: &str,
        email: &str,
        phone: Option<&str>,
    ) -> Result<Member, ReservationError> {
        let mut member = Member::new(self.ids.generate_member_id(), name, email, self.now());
        if let Some(phone) = phone {
            member = member.with_phone(phone);
        }
        let stored = member.clone();
        self.store.transaction(move |tx| {
            tx.insert_member(member)?;
            Ok::<_, ReservationError>(())
        })?;
        info!(member = %stored.id, "member registered");
        Ok(stored)
    }

    /// ISBNs are unique; a second copy of the same title is a duplicate.
    pub fn add_book(
        &self,
        title: &str,
        author: &str,
        isbn: &str,
        available: bool,
    ) -> Result<Book, ReservationError> {
        let mut book = Book::new(self.ids.generate_book_id(), title, author, isbn, self.now());
        book.available = available;
        let stored = book.clone();
        self.store.transaction(move |tx| {
            tx.insert_book(book)?;
            Ok::<_, ReservationError>(())
        })?;
        info!(book = %stored.id, isbn = %stored.isbn, "book added");
        Ok(stored)
    }

    pub fn member(&self, id: MemberId) -> Result<Member, ReservationError> {
        self.store.transaction(|tx| Ok(tx.member(id)?))
    }

    pub fn book(&self, id: BookId) -> Result<Book, ReservationError> {
        self.store.transaction(|tx| Ok(tx.book(id)?))
    }

    pub fn reservation(&self, id: ReservationId) -> Result<Reservation, ReservationError> {
        self.store.transaction(|tx| Ok(tx.reservation(id)?))
    }

    pub fn reservations(
        &self,
        filter: &ReservationFilter,
        order: ReservationOrder,
    ) -> Result<Vec<Reservation>, ReservationError> {
        self.store
            .transaction(|tx| Ok(tx.find_reservations(filter, order)?))
    }

    /// Books flagged available whose ready slot is free.
    pub fn available_books(&self) -> Result<Vec<Book>, ReservationError> {
        self.store.transaction(|tx| {
            let held = tx.find_reservations(
                &ReservationFilter::new().status(ReservationStatus::Ready),
                ReservationOrder::CreatedAt,
            )?;
            let mut books: Vec<Book> = tx
                .books()?
                .into_iter()
                .filter(|b| b.available && !held.iter().any(|r| r.book == b.id))
                .collect();
            books.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
            Ok(books)
        })
    }

    /// Case-insensitive substring match on member name and email, and on book
    /// title and author; newest first. An empty term matches nothing.
    pub fn search_reservations(&self, term: &str) -> Result<Vec<Reservation>, ReservationError> {
        let needle = term.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        self.store.transaction(|tx| {
            let members = tx.members()?;
            let books = tx.books()?;
            let hit = |text: &str| text.to_lowercase().contains(&needle);
            let mut found: Vec<Reservation> = tx
                .find_reservations(&ReservationFilter::new(), ReservationOrder::CreatedAt)?
                .into_iter()
                .filter(|r| {
                    members
                        .iter()
                        .find(|m| m.id == r.member)
                        .is_some_and(|m| hit(&m.name) || hit(&m.email))
                        || books
                            .iter()
                            .find(|b| b.id == r.book)
                            .is_some_and(|b| hit(&b.title) || hit(&b.author))
                })
                .collect();
            found.reverse();
            Ok(found)
        })
    }

    pub fn counts(&self) -> Result<ReservationCounts, ReservationError> {
        self.store.transaction(|tx| {
            let mut counts = ReservationCounts::default();
            for r in tx.find_reservations(&ReservationFilter::new(), ReservationOrder::CreatedAt)? {
                counts.record(r.status);
            }
            Ok(counts)
        })
    }

    /// Live reservations held by the member.
    pub fn member_active_count(&self, member: MemberId) -> Result<usize, ReservationError> {
        self.store.transaction(|tx| {
            tx.member(member)?;
            let live = tx.find_reservations(
                &ReservationFilter::new().member(member).live(),
                ReservationOrder::CreatedAt,
            )?;
            Ok(live.len())
        })
    }

    pub fn queue_length(&self, book: BookId) -> Result<usize, ReservationError> {
        self.store.transaction(|tx| {
            tx.book(book)?;
            let queued = tx.find_reservations(
                &ReservationFilter::new()
                    .book(book)
                    .status(ReservationStatus::Queued),
                ReservationOrder::CreatedAt,
            )?;
            Ok(queued.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::domain::ErrorKind;
    use crate::service::NewReservation;
    use crate::service::testing::{Desk, desk};

    #[rstest]
    fn duplicate_email_and_isbn_are_rejected(desk: Desk) {
        let email = desk
            .service
            .register_member("Alicia", "alice@example.com", Some("555-0100"))
            .unwrap_err();
        let isbn = desk
            .service
            .add_book("Another copy", "Le Guin", "9780441478125", true)
            .unwrap_err();

        assert_eq!(email.kind(), ErrorKind::Duplicate);
        assert_eq!(isbn.kind(), ErrorKind::Duplicate);
    }

    #[rstest]
    fn lookups_return_registered_records_or_not_found(desk: Desk) {
        assert_eq!(desk.service.member(desk.bob.id).unwrap(), desk.bob);
        assert_eq!(desk.service.book(desk.book.id).unwrap(), desk.book);

        let missing = desk.service.ids.generate_book_id();
        let err = desk.service.book(missing).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[rstest]
    fn available_books_excludes_held_and_unflagged(desk: Desk) {
        let shelved = desk
            .service
            .add_book("Kindred", "Butler", "9780807083697", true)
            .unwrap();
        desk.service
            .add_book("Dhalgren", "Delany", "9780375706684", false)
            .unwrap();
        desk.service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();

        let available = desk.service.available_books().unwrap();

        assert_eq!(available.len(), 1);
        assert_eq!(available[0].id, shelved.id);
    }

    #[rstest]
    fn search_matches_member_title_and_author_case_insensitively(desk: Desk) {
        let by_alice = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();
        desk.service
            .create(NewReservation::queued(desk.bob.id, desk.book.id))
            .unwrap();

        let by_member = desk.service.search_reservations("ALICE").unwrap();
        let by_title = desk.service.search_reservations("left hand").unwrap();
        let by_author = desk.service.search_reservations("le guin").unwrap();

        assert_eq!(by_member.len(), 1);
        assert_eq!(by_member[0].id, by_alice.id);
        assert_eq!(by_title.len(), 2);
        assert_eq!(by_author.len(), 2);
        assert!(desk.service.search_reservations("  ").unwrap().is_empty());
    }

    #[rstest]
    fn counts_and_per_member_tallies(desk: Desk) {
        let held = desk
            .service
            .create(NewReservation::ready(desk.alice.id, desk.book.id))
            .unwrap();
        desk.service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();
        desk.service
            .create(NewReservation::queued(desk.bob.id, desk.book.id))
            .unwrap();
        desk.service.cancel(held.id).unwrap();

        let counts = desk.service.counts().unwrap();

        assert_eq!(
            counts,
            ReservationCounts {
                queued: 2,
                ready: 0,
                cancelled: 1
            }
        );
        assert_eq!(counts.live(), 2);
        assert_eq!(desk.service.member_active_count(desk.alice.id).unwrap(), 1);
        assert_eq!(desk.service.queue_length(desk.book.id).unwrap(), 2);
    }

    #[rstest]
    fn listing_orders_by_expiry(desk: Desk) {
        let later = desk
            .service
            .create(NewReservation::queued(desk.alice.id, desk.book.id))
            .unwrap();
        let sooner = desk
            .service
            .create(
                NewReservation::queued(desk.bob.id, desk.book.id)
                    .expires_at(desk.service.now() + chrono::TimeDelta::days(1)),
            )
            .unwrap();

        let listed = desk
            .service
            .reservations(
                &ReservationFilter::new().book(desk.book.id),
                ReservationOrder::ExpiresAt,
            )
            .unwrap();

        let ids: Vec<_> = listed.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![sooner.id, later.id]);
    }
}
